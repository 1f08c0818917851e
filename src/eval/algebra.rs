use crate::core::list::MergeOp;
use crate::core::state::EngineState;
use crate::eval::value::{EvalError, EvalResult};

use crate::eval::value::EvalResult::{Cluster, List, Pattern, Scalar};

/// `+`: cluster union, pattern union, scalar sum, list outer-join sum
pub fn add(state: &EngineState, a: EvalResult, b: EvalResult) -> Result<EvalResult, EvalError> {
    match (a, b) {
        (Cluster(x), Cluster(y)) => Ok(Cluster(x.union(&y))),
        (Pattern(x), Pattern(y)) => Ok(Pattern(x.union(&y))),
        (Scalar(x), Scalar(y)) => Ok(Scalar(x + y)),
        (List(x), List(y)) => Ok(List(x.merge(&y, MergeOp::Sum, &state.insertion_codes))),
        (a, b) => Err(mismatch("+", &a, &b)),
    }
}

/// `-`: cluster difference, pattern difference (exact match only), scalar
/// difference, list outer-join subtraction
pub fn subtract(
    state: &EngineState,
    a: EvalResult,
    b: EvalResult,
) -> Result<EvalResult, EvalError> {
    match (a, b) {
        (Cluster(x), Cluster(y)) => Ok(Cluster(x.minus(&y))),
        (Pattern(x), Pattern(y)) => Ok(Pattern(x.minus(&y))),
        (Scalar(x), Scalar(y)) => Ok(Scalar(x - y)),
        (List(x), List(y)) => Ok(List(x.merge(&y, MergeOp::Difference, &state.insertion_codes))),
        (a, b) => Err(mismatch("-", &a, &b)),
    }
}

/// `*`: cluster/pattern intersection, scalar product, list outer-join ratio
/// (the frequency-normalization operator)
pub fn multiply(
    state: &EngineState,
    a: EvalResult,
    b: EvalResult,
) -> Result<EvalResult, EvalError> {
    match (a, b) {
        (Cluster(x), Cluster(y)) => Ok(Cluster(x.intersection(&y))),
        (Pattern(x), Pattern(y)) => Ok(Pattern(x.intersection(&y))),
        (Scalar(x), Scalar(y)) => Ok(Scalar(x * y)),
        (List(x), List(y)) => Ok(List(x.merge(&y, MergeOp::Ratio, &state.insertion_codes))),
        (a, b) => Err(mismatch("*", &a, &b)),
    }
}

/// `==`: structural, order-insensitive equality as a printable 0/1 scalar.
/// Operands of different kinds are simply unequal.
pub fn equality(state: &EngineState, a: &EvalResult, b: &EvalResult) -> EvalResult {
    let equal = match (a, b) {
        (Cluster(x), Cluster(y)) => x.same_isolates(y),
        (Pattern(x), Pattern(y)) => x.same_mutations(y),
        (Scalar(x), Scalar(y)) => x == y,
        (List(x), List(y)) => x.same_rows(y, &state.insertion_codes),
        _ => false,
    };
    Scalar(if equal { 1.0 } else { 0.0 })
}

fn mismatch(op: &'static str, a: &EvalResult, b: &EvalResult) -> EvalError {
    EvalError::KindMismatch {
        op,
        left: a.kind_name(),
        right: b.kind_name(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cluster;
    use crate::core::mutation::{InsertionCodes, Mutation};

    fn cluster_of(indices: &[u32]) -> EvalResult {
        Cluster(cluster::Cluster::new(indices.to_vec()))
    }

    fn pattern_of(tokens: &[&str]) -> EvalResult {
        let codes = InsertionCodes::new();
        Pattern(cluster::Pattern::new(
            tokens
                .iter()
                .map(|t| Mutation::parse(t, &codes).unwrap())
                .collect(),
        ))
    }

    #[test]
    fn test_cluster_algebra() {
        let state = EngineState::new();
        let a = cluster_of(&[1, 2, 3]);
        let b = cluster_of(&[2, 3, 4]);

        match add(&state, a.clone(), b.clone()).unwrap() {
            Cluster(c) => assert_eq!(c.indices(), &[1, 2, 3, 4]),
            other => panic!("expected cluster, got {}", other.kind_name()),
        }
        match subtract(&state, a.clone(), b.clone()).unwrap() {
            Cluster(c) => assert_eq!(c.indices(), &[1]),
            other => panic!("expected cluster, got {}", other.kind_name()),
        }
        match multiply(&state, a, b).unwrap() {
            Cluster(c) => assert_eq!(c.indices(), &[2, 3]),
            other => panic!("expected cluster, got {}", other.kind_name()),
        }
    }

    #[test]
    fn test_scalar_algebra() {
        let state = EngineState::new();
        assert_eq!(add(&state, Scalar(2.0), Scalar(3.0)).unwrap(), Scalar(5.0));
        assert_eq!(
            multiply(&state, Scalar(2.0), Scalar(3.0)).unwrap(),
            Scalar(6.0)
        );
    }

    #[test]
    fn test_kind_mismatch() {
        let state = EngineState::new();
        let err = add(&state, cluster_of(&[1]), Scalar(1.0)).unwrap_err();
        assert!(matches!(err, EvalError::KindMismatch { op: "+", .. }));
    }

    #[test]
    fn test_equality_order_insensitive() {
        let state = EngineState::new();
        let a = pattern_of(&["N501Y", "E484K"]);
        let b = pattern_of(&["E484K", "N501Y"]);
        assert_eq!(equality(&state, &a, &b), Scalar(1.0));

        let c = pattern_of(&["N501Y"]);
        assert_eq!(equality(&state, &a, &c), Scalar(0.0));
        assert_eq!(equality(&state, &a, &Scalar(1.0)), Scalar(0.0));
    }
}
