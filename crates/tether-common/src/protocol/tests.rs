//! Tests for the protocol module
//!
//! These tests verify request id generation, status ordinals, signature
//! matching and result helpers.

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use crate::codec::value::ArrayValue;
    use crate::protocol::*;
    use crate::Value;

    fn add_signature() -> MethodSignature {
        MethodSignature::new(TypeSpec::boxed(TypeRef::Double))
            .param(TypeSpec::boxed(TypeRef::Double))
            .param(TypeSpec::boxed(TypeRef::Double))
    }

    // ========================================================================
    // Request ids
    // ========================================================================

    #[test]
    fn test_request_ids_increase() {
        let a = next_request_id();
        let b = next_request_id();
        assert!(b > a);
        assert!(a >= 1);
    }

    #[test]
    fn test_request_ids_unique_across_threads() {
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(|| (0..1000).map(|_| next_request_id()).collect::<Vec<_>>()))
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate request id {}", id);
            }
        }
        assert_eq!(seen.len(), 8000);
    }

    #[test]
    fn test_invoke_spec_stamps_id_and_time() {
        let spec = InvokeSpec::new("DoubleService", "add", add_signature(), vec![]);
        assert!(spec.request_id > 0);
        assert!(spec.timestamp > 0);

        let pinned = spec.clone().with_request_id(5);
        assert_eq!(pinned.request_id, 5);
        assert_eq!(pinned.method_name, "add");
    }

    // ========================================================================
    // Status codes
    // ========================================================================

    #[test]
    fn test_status_ordinals() {
        assert_eq!(StatusCode::Ok.ordinal(), 0);
        assert_eq!(StatusCode::ProtocolError.ordinal(), 1);
        assert_eq!(StatusCode::ParameterError.ordinal(), 2);
        assert_eq!(StatusCode::LookupError.ordinal(), 3);
        assert_eq!(StatusCode::InvocationError.ordinal(), 4);
        assert_eq!(StatusCode::UnknownError.ordinal(), 5);

        for ordinal in 0..6 {
            let status = StatusCode::from_ordinal(ordinal).unwrap();
            assert_eq!(status.ordinal(), ordinal);
        }
        assert_eq!(StatusCode::from_ordinal(6), None);
        assert_eq!(StatusCode::from_ordinal(u32::MAX), None);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(StatusCode::ParameterError.to_string(), "PARAMETER_ERROR");
        assert_eq!(StatusCode::Ok.to_string(), "OK");
    }

    // ========================================================================
    // Signatures
    // ========================================================================

    #[test]
    fn test_type_match_checks_arity() {
        let spec = InvokeSpec::new(
            "DoubleService",
            "add",
            add_signature().param(TypeSpec::boxed(TypeRef::Double)),
            vec![Value::Double(1.0), Value::Double(2.0)],
        );
        assert!(!spec.is_type_match());
    }

    #[test]
    fn test_type_match_accepts_nulls() {
        let spec = InvokeSpec::new(
            "DoubleService",
            "add",
            add_signature(),
            vec![Value::Null, Value::Double(2.0)],
        );
        assert!(spec.is_type_match());
    }

    #[test]
    fn test_type_match_rejects_wrong_types() {
        let spec = InvokeSpec::new(
            "DoubleService",
            "add",
            add_signature(),
            vec![Value::Int(1), Value::Double(2.0)],
        );
        assert!(!spec.is_type_match());
    }

    #[test]
    fn test_accepts_container_variants() {
        use crate::Comparator;

        let sorted = Value::sorted_set(Comparator::Natural, [Value::Int(2), Value::Int(1)]);
        assert!(TypeRef::Collection(CollectionKind::Set).accepts(&sorted));
        assert!(!TypeRef::Collection(CollectionKind::List).accepts(&sorted));

        let sorted_map = Value::sorted_map(Comparator::Natural, []);
        assert!(TypeRef::Map(MapKind::Map).accepts(&sorted_map));
        assert!(!TypeRef::Map(MapKind::SortedMap).accepts(&Value::map([])));

        let ints = Value::Array(Arc::new(
            ArrayValue::new(TypeRef::Int, vec![Value::Int(1)]).unwrap(),
        ));
        assert!(TypeRef::array(TypeRef::Any).accepts(&ints));
        assert!(TypeRef::array(TypeRef::Int).accepts(&ints));
        assert!(!TypeRef::array(TypeRef::Long).accepts(&ints));

        assert!(TypeRef::registered("User").accepts(&Value::object("User", vec![])));
        assert!(!TypeRef::registered("User").accepts(&Value::object("Admin", vec![])));
        assert!(!TypeRef::Void.accepts(&Value::Int(1)));
        assert!(TypeRef::Void.accepts(&Value::Null));
    }

    #[test]
    fn test_primitive_flag_validity() {
        assert!(TypeSpec::primitive(TypeRef::Double).is_valid());
        assert!(TypeSpec::primitive(TypeRef::Void).is_valid());
        assert!(!TypeSpec::primitive(TypeRef::String).is_valid());
        assert!(TypeSpec::boxed(TypeRef::String).is_valid());
    }

    #[test]
    fn test_signature_display() {
        let signature = MethodSignature::new(TypeSpec::primitive(TypeRef::Double))
            .param(TypeSpec::boxed(TypeRef::Double))
            .param(TypeSpec::boxed(TypeRef::array(TypeRef::String)));
        assert_eq!(signature.to_string(), "(Double, String[])double");
    }

    // ========================================================================
    // Results
    // ========================================================================

    #[test]
    fn test_error_result_maps_to_remote_error() {
        let result = InvokeResult::error(3, StatusCode::LookupError, "Method not found: \"sub\"");
        assert!(!result.is_ok());
        assert_eq!(result.payload, Value::Null);

        match result.into_payload() {
            Err(TetherError::Remote { status, message }) => {
                assert_eq!(status, StatusCode::LookupError);
                assert_eq!(message, "Method not found: \"sub\"");
            }
            other => panic!("expected remote error, got {:?}", other),
        }
    }

    #[test]
    fn test_pending_failure_keeps_class() {
        let protocol = TetherError::BadMagic(0xBEEF).for_pending();
        assert!(matches!(protocol, TetherError::Protocol(_)));

        let closed = TetherError::ConnectionClosed("peer".into()).for_pending();
        assert!(matches!(closed, TetherError::ConnectionClosed(ref r) if r == "peer"));
    }
}
