//! End-to-end scenarios run against a fresh engine and the in-memory writer.

use tally_core::{ContextKey, LifecycleConfig, StepData, TestData};
use tally_model::{Link, Parameter, Stage, Status, StatusDetails};
use tally_test::{run_with_config, run_with_lifecycle};

// =============================================================================
// Basic start/stop
// =============================================================================

#[test]
fn test_nested_steps_and_label() {
    let results = run_with_lifecycle(|lifecycle| {
        let ctx = ContextKey::fresh();
        lifecycle.start_test(&ctx, None, TestData::new("t1"));
        lifecycle.start_step(&ctx, "s1");
        lifecycle.start_step(&ctx, "s2");
        lifecycle.stop_step(&ctx);
        lifecycle.stop_step(&ctx);
        lifecycle.add_label(&ctx, "owner", "alice");
        lifecycle.stop_test(&ctx);
    });

    let t1 = results.find_by_name("t1").unwrap();
    assert_eq!(t1.step_names(), vec!["s1"]);
    assert_eq!(t1.steps[0].step_names(), vec!["s2"]);
    assert!(t1.steps[0].steps[0].steps.is_empty());
    assert_eq!(t1.label_values("owner"), vec!["alice"]);
    assert_eq!(t1.stage, Stage::Finished);
}

#[test]
fn test_repeated_parameters_are_kept_in_order() {
    let results = run_with_lifecycle(|lifecycle| {
        let ctx = ContextKey::fresh();
        lifecycle.start_test(&ctx, None, TestData::new("t2"));
        lifecycle.add_parameter(&ctx, "a", "1");
        lifecycle.add_parameter(&ctx, "a", "2");
        lifecycle.stop_test(&ctx);
    });

    let t2 = results.find_by_name("t2").unwrap();
    assert_eq!(t2.parameters, vec![Parameter::new("a", "1"), Parameter::new("a", "2")]);
}

#[test]
fn test_stop_without_start_produces_nothing() {
    let results = run_with_lifecycle(|lifecycle| {
        let ctx = ContextKey::fresh();
        assert_eq!(lifecycle.stop_test(&ctx), None);
        assert_eq!(lifecycle.stop_step(&ctx), None);
        assert!(!lifecycle.stop_test_by_id(&ctx, &"t3".into()));
    });

    assert!(results.test_results().is_empty());
}

#[test]
fn test_double_stop_writes_once() {
    let results = run_with_lifecycle(|lifecycle| {
        let ctx = ContextKey::fresh();
        let id = lifecycle.start_test(&ctx, None, TestData::new("once")).unwrap();
        assert!(lifecycle.stop_test_by_id(&ctx, &id));
        assert!(!lifecycle.stop_test_by_id(&ctx, &id));
        assert_eq!(lifecycle.stop_test(&ctx), None);
    });

    assert_eq!(results.test_results().len(), 1);
}

#[test]
fn test_result_count_matches_stop_count() {
    let results = run_with_lifecycle(|lifecycle| {
        let ctx = ContextKey::fresh();
        for n in 0..5 {
            lifecycle.start_test(&ctx, None, TestData::new(format!("test-{}", n)));
            for m in 0..n {
                lifecycle.start_step(&ctx, format!("step-{}", m));
                lifecycle.stop_step(&ctx);
            }
            lifecycle.stop_test(&ctx);
        }
        assert_eq!(lifecycle.in_progress(), 0);
    });

    let tests = results.test_results();
    assert_eq!(tests.len(), 5);
    for (n, test) in tests.iter().enumerate() {
        assert_eq!(test.steps.len(), n);
    }
}

#[test]
fn test_stop_step_leaves_test_on_top_alone() {
    let results = run_with_lifecycle(|lifecycle| {
        let ctx = ContextKey::fresh();
        let id = lifecycle.start_test(&ctx, None, TestData::new("guarded")).unwrap();
        assert_eq!(lifecycle.stop_step(&ctx), None);
        assert_eq!(lifecycle.current_node(&ctx), Some(id));
        lifecycle.stop_test(&ctx);
    });

    assert!(results.find_by_name("guarded").is_some());
}

#[test]
fn test_step_without_current_node_is_recorded_as_orphan() {
    let results = run_with_lifecycle(|lifecycle| {
        let ctx = ContextKey::fresh();
        let id = lifecycle.start_step(&ctx, "lonely");
        assert!(id.is_some());
        assert_eq!(lifecycle.current_node(&ctx), id);

        assert_eq!(lifecycle.stop_step(&ctx), id);
        assert_eq!(lifecycle.in_progress(), 0);
        assert_eq!(lifecycle.context_depth(&ctx), 0);
    });

    assert!(results.test_results().is_empty());
}

// =============================================================================
// Status derivation
// =============================================================================

#[test]
fn test_step_status_derivation() {
    let results = run_with_lifecycle(|lifecycle| {
        let ctx = ContextKey::fresh();
        lifecycle.start_test(&ctx, None, TestData::new("statuses"));

        lifecycle.start_step(&ctx, "unset");
        lifecycle.stop_step(&ctx);

        lifecycle.start_step(&ctx, "failed");
        lifecycle.set_status(
            &ctx,
            Status::Failed,
            Some(StatusDetails::new().with_message("expected 1, got 2")),
        );
        lifecycle.stop_step(&ctx);

        lifecycle.stop_test(&ctx);
        // nothing current any more
        assert!(!lifecycle.set_status(&ctx, Status::Passed, None));
    });

    let test = results.find_by_name("statuses").unwrap();
    assert_eq!(test.steps[0].status, Status::Passed);
    assert_eq!(test.steps[1].status, Status::Failed);
    assert_eq!(
        test.steps[1].status_details.as_ref().and_then(|d| d.message.as_deref()),
        Some("expected 1, got 2")
    );
    assert_eq!(test.status, Status::Unknown);
}

#[test]
fn test_default_test_status_from_config() {
    let config = LifecycleConfig::default().with_default_test_status(Status::Passed);
    let results = run_with_config(config, |lifecycle| {
        let ctx = ContextKey::fresh();
        lifecycle.start_test(&ctx, None, TestData::new("derived"));
        lifecycle.stop_test(&ctx);

        lifecycle.start_test(&ctx, None, TestData::new("explicit"));
        lifecycle.set_status(&ctx, Status::Skipped, None);
        lifecycle.stop_test(&ctx);
    });

    assert_eq!(results.find_by_name("derived").unwrap().status, Status::Passed);
    assert_eq!(results.find_by_name("explicit").unwrap().status, Status::Skipped);
}

#[test]
fn test_set_status_does_not_touch_stage() {
    run_with_lifecycle(|lifecycle| {
        let ctx = ContextKey::fresh();
        let id = lifecycle.start_test(&ctx, None, TestData::new("stage")).unwrap();
        lifecycle.set_status(&ctx, Status::Broken, None);

        let mut seen = None;
        lifecycle.update_test(&id, |t| seen = Some((t.stage, t.status)));
        assert_eq!(seen, Some((Stage::Running, Status::Broken)));
        lifecycle.stop_test(&ctx);
    });
}

// =============================================================================
// Unstopped steps
// =============================================================================

#[test]
fn test_unstopped_steps_are_dropped_by_default() {
    let results = run_with_lifecycle(|lifecycle| {
        let ctx = ContextKey::fresh();
        lifecycle.start_test(&ctx, None, TestData::new("hung"));
        lifecycle.start_step(&ctx, "finished");
        lifecycle.stop_step(&ctx);
        lifecycle.start_step(&ctx, "never stopped");
        lifecycle.start_step(&ctx, "inner");
        lifecycle.stop_test(&ctx);

        assert_eq!(lifecycle.in_progress(), 0);
        assert_eq!(lifecycle.context_depth(&ctx), 0);
    });

    let test = results.find_by_name("hung").unwrap();
    assert_eq!(test.step_names(), vec!["finished"]);
}

#[test]
fn test_unstopped_steps_kept_as_interrupted() {
    let config = LifecycleConfig::from_yaml("keep_interrupted_steps: true\n").unwrap();
    let results = run_with_config(config, |lifecycle| {
        let ctx = ContextKey::fresh();
        lifecycle.start_test(&ctx, None, TestData::new("hung"));
        lifecycle.start_step(&ctx, "outer");
        lifecycle.start_step(&ctx, "inner");
        lifecycle.set_status(&ctx, Status::Failed, None);
        lifecycle.stop_test(&ctx);
    });

    let test = results.find_by_name("hung").unwrap();
    let outer = &test.steps[0];
    assert_eq!(outer.name, "outer");
    assert_eq!(outer.stage, Stage::Interrupted);
    assert_eq!(outer.status, Status::Broken);

    let inner = &outer.steps[0];
    assert_eq!(inner.stage, Stage::Interrupted);
    assert_eq!(inner.status, Status::Failed);
}

// =============================================================================
// Updates and metadata
// =============================================================================

#[test]
fn test_update_after_stop_fails_without_aborting() {
    run_with_lifecycle(|lifecycle| {
        let ctx = ContextKey::fresh();
        let id = lifecycle.start_test(&ctx, None, TestData::new("closed")).unwrap();
        lifecycle.stop_test(&ctx);

        assert!(lifecycle.try_update_test(&id, |t| t.name.push('!')).is_err());
        assert!(!lifecycle.update_test(&id, |t| t.name.push('!')));
        assert!(!lifecycle.add_label_to(&id, tally_model::Label::owner("bob")));
    });
}

#[test]
fn test_labels_and_links_go_to_the_test_under_a_step() {
    let results = run_with_lifecycle(|lifecycle| {
        let ctx = ContextKey::fresh();
        lifecycle.start_test(&ctx, None, TestData::new("meta"));
        lifecycle.start_step(&ctx, StepData::new("inside").with_description("checks"));
        lifecycle.add_label(&ctx, "epic", "epic1");
        lifecycle.add_label(&ctx, "epic", "epic1");
        lifecycle.add_link(&ctx, Link::issue("AS-1"));
        lifecycle.add_parameter(&ctx, "page", "login");
        lifecycle.stop_step(&ctx);
        lifecycle.stop_test(&ctx);
    });

    let test = results.find_by_name("meta").unwrap();
    assert_eq!(test.label_values("epic"), vec!["epic1", "epic1"]);
    assert_eq!(test.links, vec![Link::issue("AS-1")]);
    assert!(test.parameters.is_empty());
    assert_eq!(test.steps[0].parameters, vec![Parameter::new("page", "login")]);
    assert_eq!(test.steps[0].description.as_deref(), Some("checks"));
}

#[test]
fn test_attachment_body_reaches_sink() {
    let mut source = None;
    let results = run_with_lifecycle(|lifecycle| {
        let ctx = ContextKey::fresh();
        lifecycle.start_test(&ctx, None, TestData::new("attached"));
        source = lifecycle.add_attachment(&ctx, "log", Some("text/plain"), Some("txt"), b"hello");
        lifecycle.stop_test(&ctx);

        assert_eq!(lifecycle.add_attachment(&ctx, "late", None, None, b"dropped"), None);
    });

    let source = source.unwrap();
    assert!(source.ends_with("-attachment.txt"));
    assert_eq!(results.attachment(&source).as_deref(), Some(&b"hello"[..]));
    assert_eq!(results.attachment_count(), 1);

    let test = results.find_by_name("attached").unwrap();
    assert_eq!(test.attachments[0].source, source);
    assert_eq!(test.attachments[0].content_type.as_deref(), Some("text/plain"));
}

#[test]
fn test_history_id_is_stable_across_runs() {
    let run = || {
        run_with_lifecycle(|lifecycle| {
            let ctx = ContextKey::fresh();
            lifecycle.start_test(
                &ctx,
                None,
                TestData::new("login").with_full_name("auth.LoginSpec.login"),
            );
            lifecycle.add_parameter(&ctx, "user", "alice");
            lifecycle.stop_test(&ctx);
        })
        .find_by_name("login")
        .unwrap()
    };

    let first = run();
    let second = run();
    assert_ne!(first.uuid, second.uuid);
    assert!(first.history_id.is_some());
    assert_eq!(first.history_id, second.history_id);
}

#[test]
fn test_scheduled_test_runs_later() {
    let results = run_with_lifecycle(|lifecycle| {
        let ctx = ContextKey::fresh();
        let id = lifecycle.schedule_test(None, TestData::new("later")).unwrap();
        assert!(lifecycle.is_in_progress(&id));
        assert_eq!(lifecycle.context_depth(&ctx), 0);

        assert!(lifecycle.start_scheduled_test(&ctx, &id));
        assert_eq!(lifecycle.current_test(&ctx), Some(id));
        lifecycle.stop_test(&ctx);
    });

    let test = results.find_by_name("later").unwrap();
    assert_eq!(test.stage, Stage::Finished);
    assert!(test.start.is_some());
}
