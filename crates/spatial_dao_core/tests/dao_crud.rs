mod common;

use common::{memory_unit, random_string, Account, Place, Tag, SRID};
use rusqlite::types::Value;
use spatial_dao_core::geometry::{generate_long_lat_point, point};
use spatial_dao_core::{CriteriaOptions, Dao, DaoError, GenericSpatialDao, GeometryError};
use std::collections::BTreeMap;

fn accounts() -> GenericSpatialDao<Account> {
    GenericSpatialDao::new(memory_unit())
}

#[test]
fn remove_all_empties_the_table() {
    let dao = accounts();
    let mut account = Account::random();
    dao.persist(&mut account).unwrap();
    assert_eq!(dao.find_all().unwrap().len(), 1);

    assert_eq!(dao.remove_all().unwrap(), 1);
    assert!(dao.find_all().unwrap().is_empty());
    assert_eq!(dao.count().unwrap(), 0);
    dao.close().unwrap();
}

#[test]
fn count_ignores_pagination() {
    let dao = accounts();
    let mut batch = vec![Account::random(), Account::random()];
    dao.persist_many(&mut batch).unwrap();

    assert_eq!(dao.find_all().unwrap().len(), 2);
    assert_eq!(dao.count().unwrap(), 2);
    assert_eq!(
        dao.find_all_with(&CriteriaOptions::page(0, 1)).unwrap().len(),
        1
    );
    dao.close().unwrap();
}

#[test]
fn persisted_entity_round_trips_through_find() {
    let dao = accounts();
    let mut account = Account::random();
    dao.persist(&mut account).unwrap();

    let id = account.id.unwrap();
    assert_eq!(dao.find(&id).unwrap(), Some(account.clone()));

    dao.clear().unwrap();
    assert_eq!(dao.find(&id).unwrap(), Some(account));
    assert_eq!(dao.find(&(id + 1000)).unwrap(), None);
    dao.close().unwrap();
}

#[test]
fn clear_detaches_managed_entities() {
    let dao = accounts();
    let mut account = Account::random();
    dao.persist(&mut account).unwrap();

    dao.clear().unwrap();
    let err = dao.remove(&account).unwrap_err();
    assert!(matches!(err, DaoError::StaleState { .. }));

    let err = dao.refresh(&mut account).unwrap_err();
    assert!(matches!(err, DaoError::StaleState { .. }));

    dao.remove_all().unwrap();
    dao.close().unwrap();
}

#[test]
fn persist_merge_remove() {
    let dao = accounts();
    let mut account = Account::random();
    dao.persist(&mut account).unwrap();

    let found = dao.find_all().unwrap();
    assert_eq!(found, vec![account.clone()]);

    let mut changed = found[0].clone();
    changed.password = random_string();
    let managed = dao.merge(&changed).unwrap();
    assert_eq!(managed, changed);

    let updated = dao.find(&changed.id.unwrap()).unwrap().unwrap();
    assert_eq!(updated.password, changed.password);
    let stored = dao
        .execute_sql(
            "SELECT password FROM accounts WHERE id = ?",
            &[Value::Integer(changed.id.unwrap())],
        )
        .unwrap();
    assert_eq!(stored, vec![vec![Value::Text(changed.password.clone())]]);

    dao.remove(&updated).unwrap();
    assert!(dao.find_all().unwrap().is_empty());
    dao.close().unwrap();
}

#[test]
fn flush_writes_pending_geometry_update() {
    let dao = GenericSpatialDao::<Place>::new(memory_unit());
    let mut place = Place::new("pier", generate_long_lat_point(SRID).unwrap());
    dao.persist(&mut place).unwrap();
    assert_eq!(dao.find_all().unwrap(), vec![place.clone()]);

    place.location = generate_long_lat_point(SRID).unwrap();
    dao.merge(&place).unwrap();
    assert_eq!(dao.flush().unwrap(), 1);
    assert_eq!(dao.flush().unwrap(), 0);

    let stored = dao
        .execute_sql(
            "SELECT location FROM places WHERE id = ?",
            &[Value::Integer(place.id.unwrap())],
        )
        .unwrap();
    assert_eq!(stored, vec![vec![Value::Text(place.location.to_ewkt())]]);

    dao.clear().unwrap();
    let reloaded = dao.find(&place.id.unwrap()).unwrap().unwrap();
    assert_eq!(reloaded.location, place.location);
    assert_eq!(reloaded.location.srid(), SRID);

    dao.remove(&reloaded).unwrap();
    assert!(dao.find_all().unwrap().is_empty());
    dao.close().unwrap();
}

#[test]
fn entity_query_binds_positional_params() {
    let dao = accounts();
    let mut first = Account::random();
    let mut second = Account::random();
    dao.persist(&mut first).unwrap();
    dao.persist(&mut second).unwrap();
    assert_eq!(dao.find_all().unwrap().len(), 2);

    let matched = dao
        .execute_entity_query(
            "FROM accounts WHERE login = ?",
            &[Value::Text(first.login.clone())],
        )
        .unwrap();
    assert_eq!(matched, vec![first.clone()]);

    let err = dao
        .execute_entity_query("SELECT * FROM accounts", &[])
        .unwrap_err();
    assert!(matches!(err, DaoError::Query { .. }));

    dao.remove_many(&[first, second]).unwrap();
    dao.close().unwrap();
}

#[test]
fn raw_sql_returns_rows() {
    let dao = accounts();
    let mut first = Account::random();
    let mut second = Account::random();
    dao.persist(&mut first).unwrap();
    dao.persist(&mut second).unwrap();

    let rows = dao
        .execute_sql(
            "SELECT * FROM accounts WHERE login = ?",
            &[Value::Text(first.login.clone())],
        )
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].len(), 3);

    let err = dao.execute_sql("SELECT * FROM missing_table", &[]).unwrap_err();
    assert!(matches!(err, DaoError::Store { .. }));

    dao.remove_many(&[first, second]).unwrap();
    dao.close().unwrap();
}

#[test]
fn sql_update_then_refresh_reloads_state() {
    let dao = accounts();
    let mut account = Account::random();
    dao.persist(&mut account).unwrap();
    let original = account.login.clone();
    assert_eq!(
        dao.find(&account.id.unwrap()).unwrap().unwrap().login,
        original
    );

    let new_login = random_string();
    let changed = dao
        .execute_sql_update(
            "UPDATE accounts SET login = ?",
            &[Value::Text(new_login.clone())],
        )
        .unwrap();
    assert_eq!(changed, 1);
    assert_eq!(account.login, original);

    dao.refresh(&mut account).unwrap();
    assert_eq!(account.login, new_login);
    dao.remove(&account).unwrap();
    dao.close().unwrap();
}

#[test]
fn refresh_discards_unflushed_changes() {
    let dao = accounts();
    let mut account = Account::random();
    dao.persist(&mut account).unwrap();
    let original = account.password.clone();

    account.password = random_string();
    dao.merge(&account).unwrap();
    dao.refresh(&mut account).unwrap();
    assert_eq!(account.password, original);
    assert_eq!(dao.flush().unwrap(), 0);
    dao.close().unwrap();
}

#[test]
fn find_all_on_empty_table() {
    let dao = accounts();
    assert!(dao.find_all().unwrap().is_empty());
    assert!(dao
        .find_all_with(&CriteriaOptions::page(1, 100))
        .unwrap()
        .is_empty());
    dao.close().unwrap();
}

#[test]
fn find_with_properties_filters_on_attributes() {
    let dao = accounts();
    let mut account = Account::random();
    dao.persist(&mut account).unwrap();
    let id = account.id.unwrap();

    let mut properties = BTreeMap::new();
    properties.insert("login".to_string(), Value::Text(account.login.clone()));
    properties.insert(
        "password".to_string(),
        Value::Text(account.password.clone()),
    );
    assert_eq!(dao.find(&id).unwrap(), Some(account.clone()));
    assert_eq!(
        dao.find_with_properties(&id, &properties).unwrap(),
        Some(account.clone())
    );

    properties.insert("password".to_string(), Value::Text(random_string()));
    assert_eq!(dao.find_with_properties(&id, &properties).unwrap(), None);

    properties.insert("nickname".to_string(), Value::Null);
    let err = dao.find_with_properties(&id, &properties).unwrap_err();
    assert!(matches!(err, DaoError::Query { .. }));

    dao.remove_all().unwrap();
    dao.close().unwrap();
}

#[test]
fn find_many_keeps_input_order() {
    let dao = accounts();
    let mut batch = vec![Account::random(), Account::random(), Account::random()];
    dao.persist_many(&mut batch).unwrap();
    let ids = batch.iter().map(|account| account.id.unwrap()).collect::<Vec<_>>();

    let found = dao.find_many(&ids).unwrap();
    assert_eq!(
        found,
        batch.iter().cloned().map(Some).collect::<Vec<_>>()
    );

    dao.clear().unwrap();
    let missing = ids[0] + 1000;
    let found = dao.find_many(&[ids[2], missing, ids[0]]).unwrap();
    assert_eq!(
        found,
        vec![Some(batch[2].clone()), None, Some(batch[0].clone())]
    );

    dao.remove_many(&batch).unwrap_err();
    let managed = dao.find_all().unwrap();
    dao.remove_many(&managed).unwrap();
    assert_eq!(dao.count().unwrap(), 0);
    dao.close().unwrap();
}

#[test]
fn persist_with_generated_identity_assigned_fails() {
    let dao = accounts();
    let mut account = Account::random();
    account.id = Some(42);

    let err = dao.persist(&mut account).unwrap_err();
    assert!(matches!(err, DaoError::IdentityAssigned { .. }));
    assert_eq!(account.id, Some(42));
    assert_eq!(dao.count().unwrap(), 0);
    dao.close().unwrap();
}

#[test]
fn batch_persist_is_all_or_nothing() {
    let dao = accounts();
    let duplicate = random_string();
    let mut batch = vec![
        Account::random(),
        Account {
            id: None,
            login: duplicate.clone(),
            password: random_string(),
        },
        Account {
            id: None,
            login: duplicate,
            password: random_string(),
        },
    ];

    let err = dao.persist_many(&mut batch).unwrap_err();
    assert!(matches!(err, DaoError::Store { .. }));
    assert!(batch.iter().all(|account| account.id.is_none()));
    assert_eq!(dao.count().unwrap(), 0);
    dao.close().unwrap();
}

#[test]
fn empty_batches_are_no_ops() {
    let dao = GenericSpatialDao::<Place>::new(memory_unit());
    assert!(dao.find_many(&[]).unwrap().is_empty());
    dao.persist_many(&mut []).unwrap();
    assert!(dao.merge_many(&[]).unwrap().is_empty());
    dao.remove_many(&[]).unwrap();
    dao.close().unwrap();
}

#[test]
fn merge_of_unknown_generated_identity_fails() {
    let dao = accounts();
    let mut ghost = Account::random();
    ghost.id = Some(7);
    let err = dao.merge(&ghost).unwrap_err();
    assert!(matches!(err, DaoError::EntityNotFound { .. }));

    let inserted = dao.merge(&Account::random()).unwrap();
    assert!(inserted.id.is_some());
    assert_eq!(dao.count().unwrap(), 1);
    dao.close().unwrap();
}

#[test]
fn assigned_identity_entities() {
    let dao = GenericSpatialDao::<Tag>::new(memory_unit());
    let mut unnamed = Tag {
        code: None,
        label: "orphan".to_string(),
    };
    let err = dao.persist(&mut unnamed).unwrap_err();
    assert!(matches!(err, DaoError::MissingIdentity { .. }));

    let mut harbour = Tag {
        code: Some("harbour".to_string()),
        label: "Harbour".to_string(),
    };
    dao.persist(&mut harbour).unwrap();
    assert_eq!(dao.find(&"harbour".to_string()).unwrap(), Some(harbour));

    let beach = Tag {
        code: Some("beach".to_string()),
        label: "Beach".to_string(),
    };
    dao.merge(&beach).unwrap();
    assert_eq!(dao.count().unwrap(), 2);

    let mut duplicate = Tag {
        code: Some("beach".to_string()),
        label: "Other beach".to_string(),
    };
    let err = dao.persist(&mut duplicate).unwrap_err();
    assert!(matches!(err, DaoError::Store { .. }));
    dao.close().unwrap();
}

#[test]
fn invalid_stored_geometry_surfaces_as_geometry_error() {
    let dao = GenericSpatialDao::<Place>::new(memory_unit());
    dao.execute_sql_update(
        "INSERT INTO places (name, location) VALUES (?, ?)",
        &[
            Value::Text("bowtie".to_string()),
            Value::Text("SRID=4326;POLYGON((0 0, 1 1, 0 1, 1 0, 0 0))".to_string()),
        ],
    )
    .unwrap();

    let err = dao.find_all().unwrap_err();
    assert!(matches!(err, DaoError::Geometry(_)));
    dao.close().unwrap();
}

#[test]
fn stored_geometry_with_empty_member_is_rejected_on_read() {
    let dao = GenericSpatialDao::<Place>::new(memory_unit());
    dao.execute_sql_update(
        "INSERT INTO places (name, location) VALUES (?, ?)",
        &[
            Value::Text("half-empty".to_string()),
            Value::Text("SRID=4326;MULTIPOLYGON(((0 0,0 1,1 1,1 0,0 0)), EMPTY)".to_string()),
        ],
    )
    .unwrap();

    match dao.find_all().unwrap_err() {
        DaoError::Geometry(GeometryError::Invalid { geometry, .. }) => {
            assert_eq!(geometry, "MULTIPOLYGON(((0 0,0 1,1 1,1 0,0 0)), EMPTY)");
        }
        other => panic!("unexpected error: {other}"),
    }
    dao.close().unwrap();
}

#[test]
fn display_names_table_and_unit() {
    let unit = memory_unit();
    let dao = GenericSpatialDao::<Place>::new(unit.clone());
    let rendered = dao.to_string();
    assert!(rendered.contains("places"));
    assert!(rendered.contains(&unit));

    let origin = point(0.0, 0.0, SRID).unwrap();
    assert_eq!(Place::new("origin", origin.clone()).location, origin);
}
