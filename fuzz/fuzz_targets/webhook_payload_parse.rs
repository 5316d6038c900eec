#![no_main]

use libfuzzer_sys::fuzz_target;
use serde_json::Value;
use strata_webhook::webhook_payloads::{
    repository_from_payload, IssuesEventPayload, PushEventPayload,
};
use strata_webhook::branch_from_ref;

fuzz_target!(|data: &[u8]| {
    let payload = match serde_json::from_slice::<Value>(data) {
        Ok(payload) => payload,
        Err(_) => return,
    };

    if let Some(repository) = repository_from_payload(&payload) {
        assert!(payload.get("repository").is_some());
        assert_eq!(Value::from(repository.id), payload["repository"]["id"]);
    }

    if let Ok(push) = serde_json::from_value::<PushEventPayload>(payload.clone()) {
        let branch = branch_from_ref(&push.git_ref);
        assert!(push.git_ref.ends_with(branch));
        if push.git_ref.starts_with("refs/heads/") {
            assert_eq!(branch.len() + "refs/heads/".len(), push.git_ref.len());
        }
    }

    if let Ok(issues) = serde_json::from_value::<IssuesEventPayload>(payload.clone()) {
        if issues.issue.is_some() {
            assert!(payload.get("issue").is_some());
        }
    }
});
