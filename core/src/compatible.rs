use std::any::Any;

/// A value that can say whether it is "the same" as another value across
/// render passes.
///
/// Values with no explicit key match on runtime type alone.
pub trait Compatible: Any {
    fn compatibility_key(&self) -> Option<String> {
        None
    }
}

/// True iff both values have the same runtime type and, when they carry
/// compatibility keys, equal keys.
pub fn compatible(a: &dyn Compatible, b: &dyn Compatible) -> bool {
    let (a_any, b_any): (&dyn Any, &dyn Any) = (a, b);
    if a_any.type_id() != b_any.type_id() {
        return false;
    }
    a.compatibility_key() == b.compatibility_key()
}

macro_rules! plain_compatible {
    ($($ty:ty),* $(,)?) => {
        $(impl Compatible for $ty {})*
    };
}

plain_compatible!((), bool, i32, i64, u32, u64, usize, String);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::{WorkflowIdentifier, WorkflowNodeId};

    struct Keyed(&'static str);

    impl Compatible for Keyed {
        fn compatibility_key(&self) -> Option<String> {
            Some(self.0.to_string())
        }
    }

    struct OtherKeyed(&'static str);

    impl Compatible for OtherKeyed {
        fn compatibility_key(&self) -> Option<String> {
            Some(self.0.to_string())
        }
    }

    #[test]
    fn test_same_type_same_key() {
        assert!(compatible(&Keyed("a"), &Keyed("a")));
        assert!(!compatible(&Keyed("a"), &Keyed("b")));
    }

    #[test]
    fn test_different_types_never_match() {
        assert!(!compatible(&Keyed("a"), &OtherKeyed("a")));
        assert!(!compatible(&1i32, &1i64));
    }

    #[test]
    fn test_plain_values_match_on_type() {
        assert!(compatible(&1i32, &2i32));
        assert!(compatible(&"x".to_string(), &"y".to_string()));
    }

    #[test]
    fn test_reflexive_and_symmetric() {
        let values: Vec<Box<dyn Compatible>> = vec![
            Box::new(Keyed("a")),
            Box::new(Keyed("b")),
            Box::new(OtherKeyed("a")),
            Box::new(7u32),
            Box::new(WorkflowNodeId::new(WorkflowIdentifier::direct("Counter"), "left")),
            Box::new(WorkflowNodeId::new(WorkflowIdentifier::direct("Counter"), "right")),
        ];
        for a in &values {
            assert!(compatible(a.as_ref(), a.as_ref()));
            for b in &values {
                assert_eq!(
                    compatible(a.as_ref(), b.as_ref()),
                    compatible(b.as_ref(), a.as_ref())
                );
            }
        }
    }

    #[test]
    fn test_node_ids_match_on_identifier_and_name() {
        let left = WorkflowNodeId::new(WorkflowIdentifier::direct("Counter"), "left");
        let again = WorkflowNodeId::new(WorkflowIdentifier::direct("Counter"), "left");
        let other = WorkflowNodeId::new(WorkflowIdentifier::direct("Clock"), "left");
        assert!(compatible(&left, &again));
        assert!(!compatible(&left, &other));
    }
}
