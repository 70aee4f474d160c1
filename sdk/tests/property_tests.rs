use proptest::prelude::*;
use sdk::errors::{EngineError, EngineErrorExt};
use sdk::types::Task;

// Hints are static strings: they never echo identities or raw runtime output.
proptest! {
    #[test]
    fn test_error_user_hint_completeness(error_str in "\\PC*") {
        let errs = vec![
            EngineError::DuplicateWorker(error_str.clone()),
            EngineError::WorkerNotFound(error_str.clone()),
            EngineError::ProviderNotFound(error_str.clone()),
            EngineError::NoAgentForProject(error_str.clone()),
            EngineError::BuildFailed { project: error_str.clone(), reason: error_str.clone() },
            EngineError::RuntimeCommandFailed { command: "docker".to_string(), output: error_str.clone() },
            EngineError::Transport(error_str.clone()),
        ];

        for err in errs {
            let hint = err.user_hint();
            prop_assert!(!hint.is_empty());
            if error_str.len() > 8 {
                prop_assert!(!hint.contains(&error_str));
            }
        }
    }
}

// Converting a task into a transport request never loses its identity.
proptest! {
    #[test]
    fn test_task_request_preserves_identity(
        id in "[a-z0-9-]{1,16}",
        description in "\\PC{1,64}",
    ) {
        let req = Task::new(id.clone(), description.clone()).to_request("complete");
        prop_assert_eq!(&req.task_id, &id);
        prop_assert_eq!(req.param_str("description"), Some(description.as_str()));
    }
}
