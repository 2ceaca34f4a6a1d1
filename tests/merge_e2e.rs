use std::sync::Arc;

use chrono::NaiveDate;
use reconcile::{
    Actor, ConfidenceTier, DirectiveSet, EntityRecord, FieldValue, InMemoryRecordStore,
    MatchConfig, MergeError, ReconcileEngine, ReconcileError, RecordStore, ValidationError,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn customer_config() -> MatchConfig {
    MatchConfig::default()
        .with_weight("phone", 2.0)
        .with_weight("name", 1.0)
        .with_weight("birth_date", 2.0)
        .with_weight("address", 1.0)
}

fn engine_with(records: &[EntityRecord]) -> (ReconcileEngine, Arc<InMemoryRecordStore>) {
    init_tracing();
    let store = Arc::new(InMemoryRecordStore::with_records(records.iter().cloned()).unwrap());
    let engine = ReconcileEngine::new(store.clone(), customer_config()).unwrap();
    (engine, store)
}

fn snapshot(store: &InMemoryRecordStore, records: &[&EntityRecord]) -> Vec<EntityRecord> {
    records
        .iter()
        .map(|r| store.get(r.id).unwrap().unwrap())
        .collect()
}

#[test]
fn phone_digits_outweigh_abbreviated_name() {
    let a = EntityRecord::new()
        .with_field("phone", FieldValue::Phone("555-0123".into()))
        .with_field("name", FieldValue::String("John Smith".into()));
    let b = EntityRecord::new()
        .with_field("phone", FieldValue::Phone("5550123".into()))
        .with_field("name", FieldValue::String("J. Smith".into()));
    let config = MatchConfig::default()
        .with_weight("phone", 2.0)
        .with_weight("name", 1.0);

    let outcome = reconcile::score(&a, &b, &config).unwrap();
    let name_score = reconcile::compare::string_similarity("John Smith", "J. Smith");

    assert!(name_score < 0.8);
    assert!((outcome.confidence - (2.0 + name_score) / 3.0).abs() < 1e-9);
    assert!(outcome.reasons.iter().any(|r| r == "phone exact match"));
    assert!(!outcome.reasons.iter().any(|r| r.starts_with("name")));
}

#[test]
fn full_review_workflow_produces_golden_record() {
    let primary = EntityRecord::new()
        .with_field("name", FieldValue::String("María García".into()))
        .with_field("phone", FieldValue::Phone("+1 (555) 010-2030".into()))
        .with_field(
            "birth_date",
            FieldValue::Date(NaiveDate::from_ymd_opt(1984, 6, 2).unwrap()),
        )
        .with_field("email", FieldValue::String("maria@old.example".into()))
        .with_field("tags", FieldValue::set(["vip", "urgent"]));
    let duplicate = EntityRecord::new()
        .with_field("name", FieldValue::String("maria garcia".into()))
        .with_field("phone", FieldValue::Phone("15550102030".into()))
        .with_field(
            "birth_date",
            FieldValue::Date(NaiveDate::from_ymd_opt(1984, 6, 3).unwrap()),
        )
        .with_field("email", FieldValue::String("maria@new.example".into()))
        .with_field("tags", FieldValue::set(["urgent", "referral"]))
        .with_field("address", FieldValue::Address("4 Elm Road".into()));
    let unrelated = EntityRecord::new()
        .with_field("name", FieldValue::String("Peter Ng".into()))
        .with_field("phone", FieldValue::Phone("555-7777".into()));

    let (engine, store) = engine_with(&[primary.clone(), duplicate.clone(), unrelated.clone()]);

    let candidates = engine.find_duplicates_for(primary.id).unwrap();
    assert_eq!(candidates.len(), 1);
    let top = &candidates[0];
    assert_eq!(top.candidate_id, duplicate.id);
    // name 1.0 (diacritics folded), phone 1.0, birth date 0.5 -> (1 + 2 + 1) / 5
    assert!((top.confidence - 0.8).abs() < 1e-9);
    assert_eq!(top.tier, ConfidenceTier::Likely);
    assert_eq!(
        top.matched_reasons,
        vec!["name exact match".to_string(), "phone exact match".to_string()]
    );

    let first_try = engine
        .plan_merge(primary.id, duplicate.id, &DirectiveSet::empty())
        .unwrap();
    let unresolved: Vec<&str> = first_try.unresolved_fields.iter().map(String::as_str).collect();
    assert_eq!(unresolved, vec!["birth_date", "email", "tags"]);

    let directives = DirectiveSet::builder()
        .keep_primary("birth_date")
        .keep_duplicate("email")
        .merge_union("tags")
        .build()
        .unwrap();
    let plan = engine
        .plan_merge(primary.id, duplicate.id, &directives)
        .unwrap();
    assert!(plan.is_executable());
    assert_eq!(
        plan.resulting_fields.get("tags"),
        Some(&FieldValue::set(["vip", "urgent", "referral"]))
    );
    assert_eq!(
        plan.resulting_fields.get("address"),
        Some(&FieldValue::Address("4 Elm Road".into()))
    );
    assert_eq!(plan.previous_primary_fields(), primary.fields);

    let event = engine
        .execute(&plan, &Actor::new("clerk-12").unwrap())
        .unwrap();
    assert_eq!(event.resulting_fields, plan.resulting_fields);
    assert_eq!(
        hex::encode(event.plan_hash.as_bytes()),
        plan.plan_hash().unwrap().to_string()
    );

    let golden = store.get(primary.id).unwrap().unwrap();
    assert_eq!(golden.fields, plan.resulting_fields);
    let retired = store.get(duplicate.id).unwrap().unwrap();
    assert_eq!(retired.merged_into(), Some(primary.id));
    assert_eq!(retired.fields, duplicate.fields);
    assert_eq!(store.audit_log().unwrap(), vec![event]);
}

#[test]
fn unresolved_email_blocks_execution() {
    let primary = EntityRecord::new().with_field("email", FieldValue::String("a@x.com".into()));
    let duplicate = EntityRecord::new().with_field("email", FieldValue::String("b@x.com".into()));
    let (engine, store) = engine_with(&[primary.clone(), duplicate.clone()]);

    let plan = engine
        .plan_merge(primary.id, duplicate.id, &DirectiveSet::empty())
        .unwrap();
    assert!(plan.resulting_fields.is_empty());
    assert!(plan.unresolved_fields.contains("email"));

    let before = snapshot(&store, &[&primary, &duplicate]);
    let err = engine
        .execute(&plan, &Actor::new("ops").unwrap())
        .unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::Merge(MergeError::UnresolvedConflict { .. })
    ));
    assert!(!err.is_retryable());
    assert_eq!(snapshot(&store, &[&primary, &duplicate]), before);
    assert!(store.audit_log().unwrap().is_empty());
}

#[test]
fn failed_executions_leave_no_trace() {
    let primary = EntityRecord::new().with_field("phone", FieldValue::Phone("555-0100".into()));
    let duplicate = EntityRecord::new().with_field("phone", FieldValue::Phone("5550100".into()));
    let (engine, store) = engine_with(&[primary.clone(), duplicate.clone()]);

    let plan = engine
        .plan_merge(primary.id, duplicate.id, &DirectiveSet::empty())
        .unwrap();

    // A host edit after planning makes the plan stale.
    let mut edited = store.get(primary.id).unwrap().unwrap();
    edited.set_field("email", FieldValue::String("new@x.com".into()));
    store.update(edited).unwrap();

    let before = snapshot(&store, &[&primary, &duplicate]);
    let err = engine
        .execute(&plan, &Actor::new("ops").unwrap())
        .unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::Merge(MergeError::StaleRecordState { .. })
    ));
    assert!(err.is_retryable());
    assert_eq!(snapshot(&store, &[&primary, &duplicate]), before);
    assert!(store.audit_log().unwrap().is_empty());

    // Re-planning against the fresh state succeeds.
    let plan = engine
        .plan_merge(primary.id, duplicate.id, &DirectiveSet::empty())
        .unwrap();
    engine.execute(&plan, &Actor::new("ops").unwrap()).unwrap();
    assert_eq!(store.audit_log().unwrap().len(), 1);
}

#[test]
fn merged_record_cannot_be_merged_again() {
    let a = EntityRecord::new().with_field("phone", FieldValue::Phone("1".into()));
    let b = EntityRecord::new().with_field("phone", FieldValue::Phone("1".into()));
    let c = EntityRecord::new().with_field("phone", FieldValue::Phone("1".into()));
    let (engine, _store) = engine_with(&[a.clone(), b.clone(), c.clone()]);

    let plan = engine.plan_merge(a.id, b.id, &DirectiveSet::empty()).unwrap();
    engine.execute(&plan, &Actor::new("ops").unwrap()).unwrap();

    let err = engine
        .plan_merge(c.id, b.id, &DirectiveSet::empty())
        .unwrap_err();
    assert!(err.is_logic_error());
    assert!(matches!(
        err,
        ReconcileError::Merge(MergeError::AlreadyMerged { record_id, merged_into })
            if record_id == b.id && merged_into == a.id
    ));
}

#[test]
fn merge_union_on_scalar_is_a_configuration_error() {
    let a = EntityRecord::new().with_field("email", FieldValue::String("a@x.com".into()));
    let b = EntityRecord::new().with_field("email", FieldValue::String("b@x.com".into()));
    let (engine, _store) = engine_with(&[a.clone(), b.clone()]);

    let directives = DirectiveSet::builder().merge_union("email").build().unwrap();
    let err = engine.plan_merge(a.id, b.id, &directives).unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::Validation(ValidationError::InvalidFieldType { .. })
    ));
}

#[test]
fn chained_merges_keep_a_single_root() {
    let a = EntityRecord::new().with_field("phone", FieldValue::Phone("1".into()));
    let b = EntityRecord::new().with_field("phone", FieldValue::Phone("1".into()));
    let c = EntityRecord::new().with_field("phone", FieldValue::Phone("1".into()));
    let (engine, store) = engine_with(&[a.clone(), b.clone(), c.clone()]);
    let actor = Actor::new("ops").unwrap();

    let plan = engine.plan_merge(b.id, c.id, &DirectiveSet::empty()).unwrap();
    engine.execute(&plan, &actor).unwrap();
    let plan = engine.plan_merge(a.id, b.id, &DirectiveSet::empty()).unwrap();
    engine.execute(&plan, &actor).unwrap();

    for record in store.list().unwrap() {
        if let Some(target) = record.merged_into() {
            assert_eq!(target, a.id);
            assert!(store.get(target).unwrap().unwrap().is_active());
        }
    }
    assert_eq!(store.resolve(c.id).unwrap().unwrap().id, a.id);
}
