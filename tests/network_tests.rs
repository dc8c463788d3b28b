use approx::assert_relative_eq;
use hyperbolic_gnn::algorithms::loss::CompositeLoss;
use hyperbolic_gnn::manifolds::poincare::random_hyperbolic_point;
use hyperbolic_gnn::{
    DataSource, Error, GeometryMode, HyperbolicLinear, HyperbolicNetwork, ModelState,
    NetworkConfig, Result, TrainOverrides, TrainingData, Vector,
};
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn random_nodes(count: usize, dim: usize, seed: u64) -> Vec<Vector> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| Vector::from(random_hyperbolic_point(dim, 0.3, &mut rng).unwrap()))
        .collect()
}

fn small_graph() -> TrainingData {
    TrainingData::new(random_nodes(3, 8, 1), vec![(0, 1), (1, 2)]).with_labels(vec![0.0, 1.0, 0.0])
}

fn holdout() -> TrainingData {
    TrainingData::new(random_nodes(2, 8, 2), vec![])
}

fn scenario_config() -> NetworkConfig {
    NetworkConfig::new()
        .with_embedding_dim(8)
        .with_num_layers(2)
        .with_curvature(-1.0)
        .with_max_epochs(10)
        .with_seed(42)
}

fn trained_network() -> HyperbolicNetwork {
    let mut network = HyperbolicNetwork::new(scenario_config()).unwrap();
    network.train(&[small_graph()], None).unwrap();
    network
}

// =========================================================================
// TEST 1: Configuration validation
// =========================================================================

#[test]
fn test_invalid_configurations_are_rejected() {
    for config in [
        NetworkConfig::new().with_embedding_dim(0),
        NetworkConfig::new().with_num_layers(0),
        NetworkConfig::new().with_learning_rate(-0.1),
    ] {
        assert!(matches!(
            HyperbolicNetwork::new(config),
            Err(Error::Configuration(_))
        ));
    }
}

// =========================================================================
// TEST 2: Data validation
// =========================================================================

#[test]
fn test_invalid_training_data_is_rejected() {
    let mut network = HyperbolicNetwork::new(scenario_config()).unwrap();
    let nodes = random_nodes(2, 8, 3);

    let empty = TrainingData::new(vec![], vec![]);
    assert!(matches!(network.forward(&empty), Err(Error::EmptyData)));

    let bad_edge = TrainingData::new(nodes.clone(), vec![(0, 99)]);
    assert!(matches!(
        network.forward(&bad_edge),
        Err(Error::Index { index: 99, len: 2 })
    ));

    let bad_labels = TrainingData::new(nodes, vec![]).with_labels(vec![1.0]);
    assert!(matches!(
        network.train(&[bad_labels], None),
        Err(Error::LabelMismatch { labels: 1, nodes: 2 })
    ));
}

#[test]
fn test_predict_before_train_fails() {
    let mut network = HyperbolicNetwork::new(scenario_config()).unwrap();
    assert!(matches!(
        network.predict(&holdout()),
        Err(Error::UntrainedModel)
    ));
}

// =========================================================================
// TEST 3: End-to-end training and prediction
// =========================================================================

#[test]
fn test_end_to_end_scenario() {
    let mut network = trained_network();

    let history = network.training_history();
    assert!(!history.is_empty());
    assert!(history.len() <= 10);
    let last = history.last().unwrap();
    assert_eq!(last.boundary_loss, 0.0);
    assert!(last.loss.is_finite());

    let prediction = network.predict(&holdout()).unwrap();
    assert_eq!(prediction.predictions.len(), 2);
    assert_eq!(prediction.embeddings.len(), 2);
    for (p, c) in prediction.predictions.iter().zip(&prediction.confidence) {
        assert!(*p >= 0.0 && *p < 1.0);
        assert!((0.0..=1.0).contains(c));
        assert_relative_eq!(*c, (-p).exp(), epsilon = 1e-12);
    }

    let insights = &prediction.geometric_insights;
    assert_eq!(insights.geodesic_distances.dim(), (2, 2));
    assert_eq!(insights.curvature, -1.0);
    assert!(insights.centroid.norm() < 1.0);
}

#[test]
fn test_hyperedges_feed_message_passing() {
    let mut network = trained_network();
    let nodes = random_nodes(4, 8, 5);

    let plain = TrainingData::new(nodes.clone(), vec![]);
    let grouped = TrainingData::new(nodes, vec![]).with_hyperedges(vec![vec![0, 1, 2]]);

    let a = network.predict(&plain).unwrap();
    let b = network.predict(&grouped).unwrap();
    assert_ne!(a.embeddings[0], b.embeddings[0]);
    assert_eq!(a.embeddings.len(), b.embeddings.len());
}

// =========================================================================
// TEST 4: Export / import round trip
// =========================================================================

#[test]
fn test_export_import_round_trip() {
    let mut network = trained_network();
    let before = network.predict(&holdout()).unwrap();

    let json = network.export_model().to_json().unwrap();
    let state = ModelState::from_json(&json).unwrap();

    let mut restored = HyperbolicNetwork::new(NetworkConfig::new().with_embedding_dim(4)).unwrap();
    restored.import_model(state).unwrap();

    assert_eq!(restored.config(), network.config());
    assert_eq!(restored.current_curvature(), network.current_curvature());
    assert_eq!(restored.training_history(), network.training_history());
    assert!(restored.is_trained());

    let after = restored.predict(&holdout()).unwrap();
    for (x, y) in before.predictions.iter().zip(&after.predictions) {
        assert_relative_eq!(*x, *y, epsilon = 1e-9);
    }
}

#[test]
fn test_import_preserves_geometry_mode() {
    let mut network = trained_network();
    network.set_geometry_mode(GeometryMode::Euclidean);

    let mut restored = trained_network();
    restored.import_model(network.export_model()).unwrap();
    assert_eq!(restored.geometry_mode(), GeometryMode::Euclidean);
    assert_eq!(restored.current_curvature(), 0.0);
}

#[test]
fn test_export_after_leaving_euclidean_mode_round_trips() {
    let flat = scenario_config()
        .with_geometry_mode(GeometryMode::Euclidean)
        .with_curvature(0.0)
        .with_max_epochs(2);

    for mode in [GeometryMode::Hyperbolic, GeometryMode::Adaptive] {
        let mut network = HyperbolicNetwork::new(flat.clone()).unwrap();
        network.train(&[small_graph()], None).unwrap();
        network.set_geometry_mode(mode);

        let json = network.export_model().to_json().unwrap();
        let mut restored = HyperbolicNetwork::new(scenario_config()).unwrap();
        restored.import_model(ModelState::from_json(&json).unwrap()).unwrap();

        assert_eq!(restored.geometry_mode(), mode);
        assert_eq!(restored.config(), network.config());
        assert_eq!(restored.current_curvature(), network.current_curvature());
        assert!(restored.is_trained());
    }
}

#[test]
fn test_malformed_state_is_a_serialization_error() {
    assert!(matches!(
        ModelState::from_json("{\"config\": 3}"),
        Err(Error::Serialization(_))
    ));
}

// =========================================================================
// TEST 5: Data sources
// =========================================================================

struct FixedSource {
    graphs: Vec<TrainingData>,
}

impl DataSource for FixedSource {
    fn training_data(&self) -> Result<Vec<TrainingData>> {
        Ok(self.graphs.clone())
    }
}

struct FailingSource;

impl DataSource for FailingSource {
    fn training_data(&self) -> Result<Vec<TrainingData>> {
        Err(Error::DataSource("corpus unavailable".to_string()))
    }
}

#[test]
fn test_train_from_source() {
    let mut network = HyperbolicNetwork::new(scenario_config()).unwrap();
    let source = FixedSource {
        graphs: vec![small_graph(), small_graph()],
    };

    let history = network
        .train_from_source(&source, Some(TrainOverrides::epochs(2)))
        .unwrap();
    assert_eq!(history.len(), 2);
    assert!(network.is_trained());

    assert!(matches!(
        network.train_from_source(&FailingSource, None),
        Err(Error::DataSource(_))
    ));
}

// =========================================================================
// TEST 6: Training dynamics
// =========================================================================

// Root, three children and six grandchildren; labels grow with depth
fn hierarchy() -> TrainingData {
    let mut rng = StdRng::seed_from_u64(17);
    let mut point =
        |radius: f64| Vector::from(random_hyperbolic_point(8, radius, &mut rng).unwrap());

    let mut nodes = vec![point(0.1)];
    let mut labels = vec![0.1];
    let mut edges = Vec::new();
    for child in 1..4 {
        nodes.push(point(0.4));
        labels.push(0.5);
        edges.push((0, child));
    }
    for grandchild in 4..10 {
        nodes.push(point(0.7));
        labels.push(0.8);
        edges.push((1 + (grandchild - 4) / 2, grandchild));
    }
    TrainingData::new(nodes, edges).with_labels(labels)
}

#[test]
fn test_training_lowers_loss_on_hierarchy() {
    let config = scenario_config()
        .with_dropout(0.0)
        .with_tolerance(0.0)
        .with_max_epochs(200);
    let mut network = HyperbolicNetwork::new(config).unwrap();
    let history = network.train(&[hierarchy()], None).unwrap();

    assert_eq!(history.len(), 200);
    let (first, last) = (history[0], history[history.len() - 1]);
    assert!(
        last.loss < first.loss,
        "loss went from {} to {}",
        first.loss,
        last.loss
    );
    assert!(last.boundary_loss <= first.boundary_loss);
    assert!(history.iter().all(|h| h.loss.is_finite()));
}

#[test]
fn test_descent_shrinks_boundary_violations() {
    // a steep map sends two of the three nodes past the 0.99 boundary norm
    let mut layer =
        HyperbolicLinear::from_parameters(Array2::eye(2) * 4.0, Array1::zeros(2), 1.0).unwrap();
    let inputs = vec![
        Vector::new(vec![0.6, 0.0]),
        Vector::new(vec![0.0, -0.6]),
        Vector::new(vec![0.4, 0.4]),
    ];
    let data = TrainingData::new(inputs.clone(), vec![]);
    let loss = CompositeLoss::new(-1.0);

    let mut boundary = Vec::new();
    for _ in 0..30 {
        let embeddings = layer.forward(&inputs, true).unwrap();
        boundary.push(loss.evaluate(&embeddings, &data).unwrap().boundary);

        let grads = loss.gradients(&embeddings, &data).unwrap();
        layer.backward(&grads).unwrap();
        layer.apply_gradients(1, 5.0).unwrap();
    }

    assert!(boundary[0] > 0.0);
    for pair in boundary.windows(2) {
        assert!(pair[1] < pair[0], "boundary term rose from {} to {}", pair[0], pair[1]);
    }
}
