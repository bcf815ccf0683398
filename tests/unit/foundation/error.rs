use super::*;

#[test]
fn display_prefixes_are_stable() {
    assert!(
        GraphError::structure("x")
            .to_string()
            .contains("graph structure error:")
    );
    assert!(
        GraphError::allocation("x")
            .to_string()
            .contains("allocation error:")
    );
    assert!(
        GraphError::backend("x")
            .to_string()
            .contains("backend error:")
    );
    assert!(
        GraphError::evaluation("x")
            .to_string()
            .contains("evaluation error:")
    );
    assert!(NumericError::new("x").to_string().contains("numeric failure:"));
}

#[test]
fn other_preserves_source() {
    let base = std::io::Error::other("boom");
    let err = GraphError::Other(anyhow::Error::new(base));
    assert!(err.to_string().contains("boom"));
}
