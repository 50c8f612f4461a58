//! Unit tests over the pure parts of merge-assist

mod common;

mod validation_cycle_test {
    use crate::common::{BOT, conflicted_mr, ready_mr};
    use merge_assist::policy::{self, Obligation};
    use merge_assist::readiness::{BlockingReason, evaluate};
    use merge_assist::types::{HistoryAction, MergeRequestSnapshot, MrStatus, PipelineStatus};

    /// Run snapshots through validation and the policy, like successive
    /// reconciliation cycles would.
    fn run_cycles(snapshots: &[MergeRequestSnapshot], threshold: u32) -> Vec<(MrStatus, u32)> {
        let mut status = MrStatus::Recognized;
        let mut count = 0;
        snapshots
            .iter()
            .map(|snapshot| {
                let t = policy::apply(status, count, &evaluate(snapshot, BOT), threshold);
                status = t.status;
                count = t.rejection_count;
                (status, count)
            })
            .collect()
    }

    #[test]
    fn test_three_conflicting_cycles_reject() {
        let states = run_cycles(&[conflicted_mr(1), conflicted_mr(1), conflicted_mr(1)], 3);
        assert_eq!(
            states,
            vec![
                (MrStatus::NotReady, 1),
                (MrStatus::NotReady, 2),
                (MrStatus::Rejected, 3),
            ]
        );
    }

    #[test]
    fn test_ready_cycle_clears_strikes() {
        let states = run_cycles(
            &[conflicted_mr(1), conflicted_mr(1), ready_mr(1), conflicted_mr(1)],
            3,
        );
        assert_eq!(states[2], (MrStatus::Ready, 0));
        assert_eq!(states[3], (MrStatus::NotReady, 1));
    }

    #[test]
    fn test_rejected_is_sticky_even_when_fixed() {
        let states = run_cycles(&[conflicted_mr(1), ready_mr(1)], 1);
        assert_eq!(states, vec![(MrStatus::Rejected, 1), (MrStatus::Rejected, 1)]);
    }

    #[test]
    fn test_long_running_pipeline_never_strikes() {
        let mut running = ready_mr(1);
        running.pipeline.as_mut().unwrap().status = PipelineStatus::Running;
        let states = run_cycles(&vec![running; 10], 3);
        assert!(states.iter().all(|s| *s == (MrStatus::NotReady, 0)));
    }

    #[test]
    fn test_rejection_carries_final_reasons() {
        let mut snapshot = conflicted_mr(1);
        snapshot.draft = true;
        let readiness = evaluate(&snapshot, BOT);
        let t = policy::apply(MrStatus::NotReady, 2, &readiness, 3);

        assert_eq!(t.history, Some(HistoryAction::Rejected));
        let Obligation::Rejected { reasons } = t.obligation else {
            panic!("expected rejection, got {:?}", t.obligation);
        };
        assert!(reasons.contains(&BlockingReason::Draft));
        assert!(reasons.contains(&BlockingReason::Conflicts));
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let mut snapshot = conflicted_mr(5);
        snapshot.blocking_discussions_resolved = false;
        snapshot.assignee_ids.clear();
        assert_eq!(evaluate(&snapshot, BOT), evaluate(&snapshot, BOT));
        assert_eq!(
            evaluate(&snapshot, BOT).messages(),
            vec![
                "MR not assigned to Merge Assist",
                "MR has conflicts",
                "Blocking discussions not resolved",
            ]
        );
    }

    #[test]
    fn test_reset_then_ready_path() {
        let reset = policy::reset_on_reassign(MrStatus::Rejected).unwrap();
        assert_eq!((reset.status, reset.rejection_count), (MrStatus::Recognized, 0));

        let t = policy::apply(reset.status, reset.rejection_count, &evaluate(&ready_mr(1), BOT), 3);
        assert_eq!(t.status, MrStatus::Ready);
        assert_eq!(t.obligation, Obligation::Ready);
    }
}

mod plan_test {
    use crate::common::make_record;
    use merge_assist::merge::{WorkUnit, compose, next_unit};
    use merge_assist::types::MergeRequestRecord;

    fn ready_on(branch: &str, count: u64) -> Vec<MergeRequestRecord> {
        (1..=count)
            .map(|iid| make_record(iid, branch, i64::try_from(iid).unwrap()))
            .collect()
    }

    #[test]
    fn test_fewer_than_batch_size_never_batches() {
        for batch_size in 2..=6 {
            for count in 1..batch_size as u64 {
                let unit = next_unit(&ready_on("main", count), batch_size).unwrap();
                assert!(
                    matches!(unit, WorkUnit::Single(ref mr) if mr.iid == 1),
                    "batch_size {batch_size}, {count} ready: {unit:?}"
                );
            }
        }
    }

    #[test]
    fn test_batches_never_exceed_batch_size() {
        for batch_size in 2..=5 {
            for count in batch_size as u64..=12 {
                let WorkUnit::Batch { members, .. } =
                    next_unit(&ready_on("main", count), batch_size).unwrap()
                else {
                    panic!("expected batch");
                };
                assert_eq!(members.len(), batch_size);
                let iids: Vec<u64> = members.iter().map(|m| m.iid).collect();
                assert_eq!(iids, (1..=batch_size as u64).collect::<Vec<_>>());
            }
        }
    }

    #[test]
    fn test_composition_is_idempotent() {
        let mut ready = ready_on("main", 7);
        ready.extend(ready_on("release", 2).into_iter().map(|mut r| {
            r.iid += 100;
            r
        }));
        let first = compose(&ready, 5);

        ready.reverse();
        assert_eq!(compose(&ready, 5), first);
    }

    #[test]
    fn test_units_never_mix_target_branches() {
        let mut ready = ready_on("main", 3);
        ready.extend((10..13).map(|iid| make_record(iid, "release", 0)));

        for unit in compose(&ready, 3) {
            let WorkUnit::Batch {
                target_branch,
                members,
            } = unit
            else {
                panic!("both branches have three ready MRs");
            };
            assert!(members.iter().all(|m| m.target_branch == target_branch));
        }
    }

    #[test]
    fn test_oldest_branch_goes_first() {
        let mut ready = ready_on("main", 2);
        ready.push(make_record(50, "release", -10));

        let unit = next_unit(&ready, 5).unwrap();
        assert_eq!(unit.target_branch(), "release");
        assert_eq!(unit.iids(), vec![50]);
    }

    #[test]
    fn test_empty_ready_set() {
        assert!(next_unit(&[], 5).is_none());
        assert!(compose(&[], 5).is_empty());
    }
}

mod annotation_test {
    use merge_assist::annotate::render;
    use merge_assist::annotate::{Annotation, MergeMode};

    fn commented() -> Vec<Annotation> {
        vec![
            Annotation::NotReady {
                iid: 1,
                reasons: vec!["MR is WIP/Draft".to_string()],
                strike: 1,
                threshold: 3,
            },
            Annotation::Rejected {
                iid: 1,
                reasons: vec!["MR is WIP/Draft".to_string()],
                threshold: 3,
            },
            Annotation::RebaseFailed {
                iid: 1,
                cause: "conflict in src/lib.rs".to_string(),
            },
            Annotation::MergeSucceeded {
                iid: 1,
                mode: MergeMode::Single,
            },
            Annotation::BatchInProgress {
                iid: 1,
                batch_iid: 9,
            },
            Annotation::ExecutionFailed {
                iid: 1,
                cause: "pipeline timeout".to_string(),
            },
        ]
    }

    #[test]
    fn test_every_comment_is_signed() {
        for annotation in commented() {
            let body = render(&annotation).unwrap();
            assert!(body.starts_with("## "), "{annotation}: {body}");
            assert!(body.ends_with("*Posted by Merge Assist*"), "{annotation}");
        }
    }

    #[test]
    fn test_rejection_explains_how_to_recover() {
        let body = render(&commented()[1]).unwrap();
        assert!(body.contains("after 3 attempts"));
        assert!(body.contains("reassign this MR to Merge Assist"));
    }

    #[test]
    fn test_causes_are_included() {
        assert!(render(&commented()[2]).unwrap().contains("conflict in src/lib.rs"));
        assert!(render(&commented()[5]).unwrap().contains("pipeline timeout"));
    }
}

mod webhook_test {
    use crate::common::BOT;
    use merge_assist::config::Config;
    use merge_assist::events::{EventHub, MrEvent, parse_webhook, route_webhook};

    fn config() -> Config {
        Config::from_toml(
            r#"
            [gitlab]
            automation_user_id = 99

            [[projects]]
            id = "app"
            gitlab_project = "group/app"

            [[projects]]
            id = "api"
            gitlab_project = "42"
            "#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_webhook_events_feed_the_hub() {
        let hub = EventHub::new();
        let sub = hub.subscribe("api");

        let assigned = r#"{
            "object_kind": "merge_request",
            "project": {"id": 42},
            "object_attributes": {"iid": 3},
            "assignees": [{"id": 99}],
            "changes": {"assignees": {"previous": [], "current": [{"id": 99}]}}
        }"#;
        let pipeline = r#"{
            "object_kind": "pipeline",
            "project": {"id": 42},
            "object_attributes": {"status": "success"},
            "merge_request": {"iid": 3}
        }"#;

        for body in [assigned, pipeline] {
            let routed = route_webhook(body, &config(), &hub).unwrap();
            assert_eq!(routed.as_deref(), Some("api"));
        }

        // Both notifications coalesce while the first is still queued.
        assert_eq!(sub.recv().await, MrEvent::reassigned(3));
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_webhook_routed_by_project_path() {
        let hub = EventHub::new();
        let sub = hub.subscribe("app");
        let body = r#"{
            "object_kind": "merge_request",
            "project": {"id": 7, "path_with_namespace": "group/app"},
            "object_attributes": {"iid": 5},
            "assignees": [{"id": 99}]
        }"#;

        let routed = route_webhook(body, &config(), &hub).unwrap();

        assert_eq!(routed.as_deref(), Some("app"));
        assert_eq!(sub.recv().await, MrEvent::changed(5));
    }

    #[test]
    fn test_webhook_for_unconfigured_project_is_dropped() {
        let hub = EventHub::new();
        let body = r#"{
            "object_kind": "merge_request",
            "project": {"id": 8, "path_with_namespace": "other/repo"},
            "object_attributes": {"iid": 5},
            "assignees": [{"id": 99}]
        }"#;
        assert!(route_webhook(body, &config(), &hub).unwrap().is_none());
    }

    #[test]
    fn test_running_pipeline_hook_is_ignored() {
        let body = r#"{
            "object_kind": "pipeline",
            "project": {"id": 42},
            "object_attributes": {"status": "running"},
            "merge_request": {"iid": 3}
        }"#;
        assert!(parse_webhook(body, BOT).unwrap().is_none());
    }
}

#[allow(unsafe_code)]
mod auth_test {
    use merge_assist::auth::{AuthSource, get_gitlab_auth};
    use merge_assist::error::Error;
    use serial_test::serial;

    fn clear() {
        // SAFETY: serialized with every other test touching these vars
        unsafe {
            std::env::remove_var("GITLAB_TOKEN");
            std::env::remove_var("GL_TOKEN");
        }
    }

    #[test]
    #[serial]
    fn test_token_from_gitlab_token() {
        clear();
        // SAFETY: serialized
        unsafe { std::env::set_var("GITLAB_TOKEN", "  glpat-abc \n") };
        let auth = get_gitlab_auth().unwrap();
        assert_eq!(auth.token, "glpat-abc");
        assert_eq!(auth.source, AuthSource::EnvVar);
        clear();
    }

    #[test]
    #[serial]
    fn test_falls_back_to_gl_token() {
        clear();
        // SAFETY: serialized
        unsafe {
            std::env::set_var("GITLAB_TOKEN", "");
            std::env::set_var("GL_TOKEN", "glpat-xyz");
        }
        assert_eq!(get_gitlab_auth().unwrap().token, "glpat-xyz");
        clear();
    }

    #[test]
    #[serial]
    fn test_missing_token_is_auth_error() {
        clear();
        let err = get_gitlab_auth().unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
        assert!(err.to_string().contains("GITLAB_TOKEN"));
    }
}
