use approx::assert_relative_eq;
use hyperbolic_gnn::algorithms::optimization::*;
use hyperbolic_gnn::core::{Manifold, Result};
use hyperbolic_gnn::manifolds::poincare::frechet_mean;
use hyperbolic_gnn::manifolds::{Euclidean, PoincareBall};
use ndarray::{arr1, Array1};

// =========================================================================
// TEST 1: Quadratic optimization on Euclidean space
// =========================================================================

struct QuadraticObjective {
    target: Array1<f64>,
}

impl ObjectiveFunction<Euclidean> for QuadraticObjective {
    fn eval(&self, _manifold: &Euclidean, p: &Array1<f64>) -> Result<f64> {
        let diff = p - &self.target;
        Ok(0.5 * diff.dot(&diff))
    }

    fn gradient_ambient(&self, _manifold: &Euclidean, p: &Array1<f64>) -> Result<Array1<f64>> {
        Ok(p - &self.target)
    }
}

#[test]
fn test_euclidean_gradient_descent() {
    let manifold = Euclidean::new(3);
    let target = arr1(&[1.0, 2.0, 3.0]);
    let objective = QuadraticObjective {
        target: target.clone(),
    };

    let p0 = arr1(&[10.0, -5.0, 7.0]);

    let optimizer = RiemannianGradientDescent::new()
        .with_step_size(0.1)
        .with_convergence(Convergence {
            max_iterations: 1000,
            grad_tol: 1e-6,
            f_tol: 1e-9,
            step_tol: 1e-9,
        });

    let result = optimizer.minimize(&manifold, &objective, p0).unwrap();

    assert!(result.converged, "Should converge");
    assert!(result.value < 1e-8, "Should reach minimum");

    for i in 0..3 {
        assert_relative_eq!(result.point[i], target[i], epsilon = 1e-3);
    }
}

// =========================================================================
// TEST 2: Geodesic distance to a target in the Poincaré ball
// =========================================================================

struct BallTarget {
    target: Array1<f64>,
}

impl ObjectiveFunction<PoincareBall> for BallTarget {
    fn eval(&self, manifold: &PoincareBall, p: &Array1<f64>) -> Result<f64> {
        let d = manifold.distance(p, &self.target)?;
        Ok(0.5 * d * d)
    }

    fn gradient_ambient(&self, manifold: &PoincareBall, p: &Array1<f64>) -> Result<Array1<f64>> {
        let lambda = manifold.conformal_factor(p);
        Ok(self.riemannian_gradient(manifold, p)? * (lambda * lambda))
    }

    fn riemannian_gradient(&self, manifold: &PoincareBall, p: &Array1<f64>) -> Result<Array1<f64>> {
        Ok(-manifold.log(p, &self.target)?)
    }
}

#[test]
fn test_poincare_exponential_vs_projection() {
    let manifold = PoincareBall::new(2);
    let target = arr1(&[0.4, -0.3]);
    let objective = BallTarget {
        target: target.clone(),
    };
    let p0 = arr1(&[-0.5, 0.2]);

    for (retraction, step) in [
        (RetractionMethod::Exponential, 1.0),
        (RetractionMethod::Projection, 0.5),
    ] {
        let optimizer = RiemannianGradientDescent::new()
            .with_step_size(step)
            .with_line_search(LineSearch::None)
            .with_retraction(retraction)
            .with_convergence(Convergence {
                max_iterations: 500,
                grad_tol: 1e-8,
                f_tol: 1e-14,
                step_tol: 1e-12,
            });

        let result = optimizer.minimize(&manifold, &objective, p0.clone()).unwrap();

        assert!(result.converged, "{:?} should converge", retraction);
        assert!(result.point.dot(&result.point) < 1.0, "iterate left the ball");
        for i in 0..2 {
            assert_relative_eq!(result.point[i], target[i], epsilon = 1e-4);
        }
    }
}

// =========================================================================
// TEST 3: Fréchet mean
// =========================================================================

#[test]
fn test_frechet_mean_of_symmetric_points_is_origin() {
    let points = vec![
        arr1(&[0.5, 0.0]),
        arr1(&[-0.5, 0.0]),
        arr1(&[0.0, 0.5]),
        arr1(&[0.0, -0.5]),
    ];
    let mean = frechet_mean(&points).unwrap();
    assert_relative_eq!(mean[0], 0.0, epsilon = 1e-8);
    assert_relative_eq!(mean[1], 0.0, epsilon = 1e-8);
}

#[test]
fn test_frechet_mean_minimises_squared_distances() {
    let points = vec![arr1(&[0.1, 0.2]), arr1(&[0.6, -0.1]), arr1(&[0.3, 0.7])];
    let manifold = PoincareBall::new(2);
    let mean = frechet_mean(&points).unwrap();

    let cost = |p: &Array1<f64>| -> f64 {
        points
            .iter()
            .map(|x| manifold.distance(p, x).unwrap().powi(2))
            .sum()
    };

    let base = cost(&mean);
    for offset in [[0.01, 0.0], [-0.01, 0.0], [0.0, 0.01], [0.0, -0.01]] {
        assert!(base <= cost(&(&mean + &arr1(&offset))));
    }
}

// =========================================================================
// TEST 4: Line search
// =========================================================================

#[test]
fn test_line_search_vs_fixed_step() {
    let manifold = Euclidean::new(2);
    let objective = QuadraticObjective {
        target: arr1(&[3.0, -1.0]),
    };
    let p0 = arr1(&[0.0, 0.0]);

    let fixed = RiemannianGradientDescent::new()
        .with_step_size(0.05)
        .with_line_search(LineSearch::None);
    let backtracking = RiemannianGradientDescent::new().with_line_search(LineSearch::default());

    let fixed_result = fixed.minimize(&manifold, &objective, p0.clone()).unwrap();
    let backtracking_result = backtracking.minimize(&manifold, &objective, p0).unwrap();

    assert!(fixed_result.converged);
    assert!(backtracking_result.converged);
    assert!(backtracking_result.iterations <= fixed_result.iterations);
}

// =========================================================================
// TEST 5: Convergence criteria
// =========================================================================

#[test]
fn test_iteration_limit_is_respected() {
    let manifold = Euclidean::new(2);
    let objective = QuadraticObjective {
        target: arr1(&[100.0, 100.0]),
    };

    let optimizer = RiemannianGradientDescent::new()
        .with_step_size(1e-4)
        .with_line_search(LineSearch::None)
        .with_convergence(Convergence {
            max_iterations: 5,
            grad_tol: 1e-12,
            f_tol: 0.0,
            step_tol: 0.0,
        });

    let result = optimizer.minimize(&manifold, &objective, arr1(&[0.0, 0.0])).unwrap();
    assert!(!result.converged);
    assert_eq!(result.iterations, 5);
}
