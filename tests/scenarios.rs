//! End-to-end scenario tests exercising the library's public API against
//! real, file-backed SQLite journal fixtures.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::{params, Connection};
use tempfile::NamedTempFile;

use sim_ingest::config::IngestConfig;
use sim_ingest::model::SessionId;
use sim_ingest::repository::FrameRepository;
use sim_ingest::service::DataService;
use sim_ingest::session::DataSession;

fn scratch_db() -> (NamedTempFile, std::path::PathBuf) {
    let file = NamedTempFile::new().unwrap();
    let path = file.path().to_path_buf();
    // rusqlite needs to create the file fresh through its own connection.
    std::fs::remove_file(&path).unwrap();
    (file, path)
}

fn create_metadata(conn: &Connection, tables: &[(&str, &str)]) {
    conn.execute_batch(
        "CREATE TABLE Object_Info (object_name TEXT, table_name TEXT);
         CREATE TABLE Column_Info (table_name TEXT, column_name TEXT, attribute_name TEXT, data_type TEXT);",
    )
    .unwrap();
    for (object, table) in tables {
        conn.execute(
            "INSERT INTO Object_Info VALUES (?1, ?2)",
            params![object, table],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO Column_Info VALUES (?1, 'val', 'val', 'REAL')",
            params![table],
        )
        .unwrap();
    }
}

fn create_data_table(conn: &Connection, table: &str) {
    conn.execute_batch(&format!(
        "CREATE TABLE {table} (s_time REAL, val REAL)",
        table = table
    ))
    .unwrap();
}

fn insert_row(conn: &Connection, table: &str, s_time: f64) {
    conn.execute(
        &format!("INSERT INTO {table} (s_time, val) VALUES (?1, ?2)", table = table),
        params![s_time, s_time],
    )
    .unwrap();
}

fn round1(t: f64) -> f64 {
    (t * 10.0).round() / 10.0
}

#[test]
fn scenario_1_independent_polling_and_merge() {
    let (_guard, path) = scratch_db();
    {
        let conn = Connection::open(&path).unwrap();
        create_metadata(&conn, &[("Fast", "TableFast"), ("Slow", "TableSlow")]);
        create_data_table(&conn, "TableFast");
        create_data_table(&conn, "TableSlow");
        let mut t = 0.0;
        while t <= 10.0 {
            insert_row(&conn, "TableFast", t);
            t = round1(t + 0.5);
        }
        let mut t = 0.0;
        while t <= 5.0 {
            insert_row(&conn, "TableSlow", t);
            t = round1(t + 0.5);
        }
    }

    let repo = Arc::new(FrameRepository::new(60.0));
    let session_id = SessionId::new();
    repo.start_new_session(session_id);

    let session = DataSession::spawn(path.clone(), 1.0, HashMap::new(), repo.clone(), session_id);
    for t in 1..=10 {
        session.enqueue(t as f64);
        std::thread::sleep(Duration::from_millis(60));
    }

    let frame = repo.frame_at(10.0).expect("frame at 10.0 should exist");
    assert!(frame.tables.contains_key("Fast"));
    assert!(!frame.tables.contains_key("Slow"));

    {
        let conn = Connection::open(&path).unwrap();
        let mut t = 5.5;
        while t <= 10.0 {
            insert_row(&conn, "TableSlow", t);
            t = round1(t + 0.5);
        }
    }
    session.enqueue(11.0);
    std::thread::sleep(Duration::from_millis(300));

    let frame = repo.frame_at(10.0).unwrap();
    assert!(frame.tables.contains_key("Fast"));
    assert!(frame.tables.contains_key("Slow"));

    session.stop();
}

#[test]
fn scenario_2_session_isolation() {
    let (_guard_a, path_a) = scratch_db();
    {
        let conn = Connection::open(&path_a).unwrap();
        create_metadata(&conn, &[("Fast", "TableFast")]);
        create_data_table(&conn, "TableFast");
        let mut t = 0.0;
        while t <= 0.9 {
            insert_row(&conn, "TableFast", t);
            t = round1(t + 0.1);
        }
    }
    let (_guard_b, path_b) = scratch_db();
    {
        let conn = Connection::open(&path_b).unwrap();
        create_metadata(&conn, &[("Fast", "TableFast")]);
        create_data_table(&conn, "TableFast");
        let mut t = 100.0;
        while t <= 100.9 {
            insert_row(&conn, "TableFast", t);
            t = round1(t + 0.1);
        }
    }

    let service = DataService::new(60.0);

    let session_a = service.context.start();
    service
        .start(IngestConfig {
            db_path: path_a.clone(),
            query_interval: 0.1,
            ..Default::default()
        })
        .unwrap();
    for i in 0..10 {
        service.enqueue_time(round1(i as f64 * 0.1));
        std::thread::sleep(Duration::from_millis(30));
    }
    assert!(service.repository.len() >= 9);

    service.stop();
    std::thread::sleep(Duration::from_millis(100));

    let session_b = service.context.start();
    assert_ne!(session_a, session_b);
    service
        .start(IngestConfig {
            db_path: path_b.clone(),
            query_interval: 0.1,
            ..Default::default()
        })
        .unwrap();
    for i in 0..10 {
        service.enqueue_time(round1(100.0 + i as f64 * 0.1));
        std::thread::sleep(Duration::from_millis(30));
    }
    std::thread::sleep(Duration::from_millis(100));

    assert!(service.repository.len() <= 12);
    assert!(
        service.repository.range(0.0, 0.9).is_empty(),
        "session A frames survived into session B's window"
    );

    service.stop();
}

#[test]
fn scenario_3_graceful_shutdown_override() {
    let (_guard, path) = scratch_db();
    {
        let conn = Connection::open(&path).unwrap();
        create_metadata(&conn, &[("Fast", "TableFast")]);
        create_data_table(&conn, "TableFast");
        let mut t = 0.0;
        while t <= 5.0 {
            insert_row(&conn, "TableFast", t);
            t = round1(t + 0.1);
        }
    }

    let repo = Arc::new(FrameRepository::new(60.0));
    let session_id = SessionId::new();
    repo.start_new_session(session_id);

    let session = DataSession::spawn(path, 1.0, HashMap::new(), repo, session_id);
    for i in 0..50 {
        session.enqueue(round1(i as f64 * 0.1));
    }

    let called = Arc::new(Mutex::new(false));
    let called2 = called.clone();
    session.mark_complete(move || {
        *called2.lock().unwrap() = true;
    });
    session.stop();

    assert!(session.wait_disposed(Duration::from_secs(1)));
    assert!(!*called.lock().unwrap());
}

#[test]
fn scenario_4_fast_forward_checkpoint_sequence() {
    let (_guard, path) = scratch_db();
    {
        let conn = Connection::open(&path).unwrap();
        create_metadata(&conn, &[("Fast", "TableFast")]);
        create_data_table(&conn, "TableFast");
        let mut t = 0.0;
        while t <= 10.0 {
            insert_row(&conn, "TableFast", t);
            t = round1(t + 0.1);
        }
    }

    let repo = Arc::new(FrameRepository::new(60.0));
    let session_id = SessionId::new();
    repo.start_new_session(session_id);

    let session = DataSession::spawn(path, 1.0, HashMap::new(), repo.clone(), session_id);
    for hint in [0.5, 1.0, 2.0, 5.5, 6.2] {
        session.enqueue(hint);
        std::thread::sleep(Duration::from_millis(150));
    }
    std::thread::sleep(Duration::from_millis(200));

    assert!(repo.frame_at(1.0).is_some());
    assert!(repo.frame_at(2.0).is_some());
    assert!(repo.frame_at(5.5).is_some());
    assert!(repo.frame_at(6.0).is_some());

    session.stop();
}

#[test]
fn scenario_5_schema_wait_then_processing_begins() {
    let (_guard, path) = scratch_db();
    // Deliberately create the file with no tables at all yet.
    Connection::open(&path).unwrap();

    let repo = Arc::new(FrameRepository::new(60.0));
    let session_id = SessionId::new();
    repo.start_new_session(session_id);

    let session = DataSession::spawn(path.clone(), 1.0, HashMap::new(), repo.clone(), session_id);
    session.enqueue(1.0);
    std::thread::sleep(Duration::from_millis(200));
    assert!(repo.is_empty(), "nothing should publish before schema exists");

    {
        let conn = Connection::open(&path).unwrap();
        create_metadata(&conn, &[("Fast", "TableFast")]);
        create_data_table(&conn, "TableFast");
        insert_row(&conn, "TableFast", 1.0);
    }
    session.enqueue(1.0);
    std::thread::sleep(Duration::from_millis(700));

    assert!(!repo.is_empty(), "processing should begin once schema validates");

    session.stop();
}

#[test]
fn scenario_6_sparse_data_forces_empty_frame() {
    let (_guard, path) = scratch_db();
    {
        let conn = Connection::open(&path).unwrap();
        create_metadata(&conn, &[("Fast", "TableFast")]);
        create_data_table(&conn, "TableFast");
        insert_row(&conn, "TableFast", 0.0);
        insert_row(&conn, "TableFast", 1.0);
    }

    let repo = Arc::new(FrameRepository::new(60.0));
    let session_id = SessionId::new();
    repo.start_new_session(session_id);

    let session = DataSession::spawn(path, 0.5, HashMap::new(), repo.clone(), session_id);
    session.enqueue(1.5);
    std::thread::sleep(Duration::from_millis(300));

    let frame_half = repo.frame_at(0.5).expect("forced frame at 0.5 should exist");
    assert!(frame_half.tables.is_empty());
    let frame_one = repo.frame_at(1.0).expect("populated frame at 1.0 should exist");
    assert!(frame_one.tables.contains_key("Fast"));

    let times: Vec<f64> = repo.range(0.0, 1.5).iter().map(|f| f.time).collect();
    for pair in times.windows(2) {
        assert!(pair[0] < pair[1], "frame times must be strictly increasing: {:?}", times);
    }

    session.stop();
}
