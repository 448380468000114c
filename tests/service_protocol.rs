use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LinesCodec};
use ulid::Ulid;

use slotcheck::config::EngineConfig;
use slotcheck::engine::{Engine, SystemClock};
use slotcheck::service::{self, Response};

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<Engine>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("slotcheck_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Arc::new(
        Engine::open(&dir.join("slotcheck.wal"), EngineConfig::default(), Arc::new(SystemClock))
            .await
            .unwrap(),
    );

    let engine2 = engine.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = engine2.clone();
            tokio::spawn(async move {
                let _ = service::process_connection(socket, engine).await;
            });
        }
    });

    (addr, engine)
}

struct Client {
    framed: Framed<TcpStream, LinesCodec>,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let socket = TcpStream::connect(addr).await.unwrap();
        Self {
            framed: Framed::new(socket, LinesCodec::new()),
        }
    }

    async fn send_line(&mut self, line: String) -> Response {
        self.framed.send(line).await.unwrap();
        let reply = self.framed.next().await.unwrap().unwrap();
        serde_json::from_str(&reply).unwrap()
    }

    async fn call(&mut self, request: Value) -> Response {
        self.send_line(request.to_string()).await
    }

    /// Call and unwrap the `data` of a successful response.
    async fn ok(&mut self, request: Value) -> Value {
        let resp = self.call(request.clone()).await;
        assert!(resp.ok, "{request} failed: {:?}", resp.error);
        resp.data.unwrap_or(Value::Null)
    }
}

fn today() -> chrono::NaiveDate {
    chrono::Utc::now().date_naive()
}

async fn setup_batch(client: &mut Client, teacher: &str, start: &str, end: &str, capacity: u32) -> (String, String) {
    let business = client
        .ok(json!({"op": "register_business", "name": "Riverside Studio", "operating_days": "daily"}))
        .await;
    let business_id = business["id"].as_str().unwrap().to_string();
    let batch = client
        .ok(json!({
            "op": "save_batch",
            "batch": {
                "business_id": business_id,
                "name": "Evening yoga",
                "teacher": teacher,
                "pattern": "Mon/Wed/Fri",
                "start_time": start,
                "end_time": end,
                "capacity": capacity,
                "start_date": today(),
                "end_date": today() + chrono::Days::new(90),
            }
        }))
        .await;
    (business_id, batch["id"].as_str().unwrap().to_string())
}

fn seat(batch_id: &str) -> Value {
    json!({
        "target": {"batch": {"batch_id": batch_id}},
        "tier": "monthly",
        "start_date": today(),
        "price": 1500,
    })
}

fn contact() -> Value {
    json!({"name": "Asha Menon", "phone": "+91 98765 43210"})
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn reserve_and_checkout_over_tcp() {
    let (addr, engine) = start_test_server().await;
    let mut client = Client::connect(addr).await;
    let (_, batch_id) = setup_batch(&mut client, "J. Rao", "16:00", "17:00", 3).await;
    let student = Ulid::new().to_string();

    let check = client
        .ok(json!({"op": "check_add", "student_id": student, "candidate": seat(&batch_id)}))
        .await;
    assert_eq!(check["result"], "compatible");

    let item = client
        .ok(json!({"op": "add_to_reservation", "student_id": student, "candidate": seat(&batch_id)}))
        .await;
    assert!(item["id"].is_string());

    let remaining = client
        .ok(json!({"op": "remaining_seconds", "student_id": student}))
        .await;
    let secs = remaining["remaining_seconds"].as_u64().unwrap();
    assert!(secs > 890 && secs <= 900, "{secs}");

    let tx = client
        .ok(json!({"op": "checkout", "student_id": student, "contact": contact()}))
        .await;
    assert_eq!(tx["total"], 1500);
    assert_eq!(tx["lines"].as_array().unwrap().len(), 1);

    let enrollments = client
        .ok(json!({"op": "student_enrollments", "student_id": student}))
        .await;
    assert_eq!(enrollments.as_array().unwrap().len(), 1);
    assert_eq!(enrollments[0]["status"], "active");

    let batch = client.ok(json!({"op": "get_batch", "batch_id": batch_id})).await;
    assert_eq!(batch["enrolled_count"], 1);

    let student_id: Ulid = student.parse().unwrap();
    assert_eq!(engine.student_transactions(&student_id).len(), 1);
}

#[tokio::test]
async fn conflicts_come_back_with_detail() {
    let (addr, _engine) = start_test_server().await;
    let mut client = Client::connect(addr).await;
    let (business_id, first) = setup_batch(&mut client, "J. Rao", "16:00", "17:00", 3).await;
    let second = client
        .ok(json!({
            "op": "save_batch",
            "batch": {
                "business_id": business_id,
                "name": "Late yoga",
                "teacher": "K. Iyer",
                "pattern": "Mon/Wed/Fri",
                "start_time": "16:30",
                "end_time": "17:30",
                "capacity": 3,
                "start_date": today(),
                "end_date": today() + chrono::Days::new(90),
            }
        }))
        .await;
    let student = Ulid::new().to_string();
    client
        .ok(json!({"op": "add_to_reservation", "student_id": student, "candidate": seat(&first)}))
        .await;

    let resp = client
        .call(json!({
            "op": "add_to_reservation",
            "student_id": student,
            "candidate": seat(second["id"].as_str().unwrap()),
        }))
        .await;
    assert!(!resp.ok);
    let error = resp.error.unwrap();
    assert_eq!(error.code, "schedule_conflict");
    let conflict = error.conflict.unwrap();
    assert_eq!(conflict.overlap_minutes, 30);
    assert_eq!(conflict.overlap_days.len(), 3);
}

#[tokio::test]
async fn teacher_double_booking_rejected_over_tcp() {
    let (addr, _engine) = start_test_server().await;
    let mut client = Client::connect(addr).await;
    let (business_id, _) = setup_batch(&mut client, "J. Rao", "16:00", "17:00", 3).await;

    let batch = |start: &str, end: &str| {
        json!({
            "op": "save_batch",
            "batch": {
                "business_id": business_id,
                "name": "Another",
                "teacher": "j. rao",
                "pattern": "mon/wed/fri",
                "start_time": start,
                "end_time": end,
                "capacity": 3,
                "start_date": today(),
                "end_date": today() + chrono::Days::new(30),
            }
        })
    };
    let resp = client.call(batch("16:30", "17:00")).await;
    assert_eq!(resp.error.unwrap().code, "teacher_conflict");
    client.ok(batch("17:00", "18:00")).await;
}

#[tokio::test]
async fn malformed_lines_get_error_replies() {
    let (addr, _engine) = start_test_server().await;
    let mut client = Client::connect(addr).await;

    let resp = client.send_line("not json".to_string()).await;
    assert!(!resp.ok);
    assert_eq!(resp.error.unwrap().code, "bad_request");

    let resp = client.call(json!({"op": "teleport"})).await;
    assert_eq!(resp.error.unwrap().code, "bad_request");

    let resp = client
        .call(json!({"op": "get_transaction", "transaction_id": Ulid::new().to_string()}))
        .await;
    assert_eq!(resp.error.unwrap().code, "not_found");

    // The connection survives bad input.
    let resp = client
        .call(json!({"op": "checkout", "student_id": Ulid::new().to_string(), "contact": contact()}))
        .await;
    assert_eq!(resp.error.unwrap().code, "empty_reservation");
}

#[tokio::test]
async fn last_seat_goes_to_one_of_many_clients() {
    let (addr, engine) = start_test_server().await;
    let mut admin = Client::connect(addr).await;
    let (_, batch_id) = setup_batch(&mut admin, "J. Rao", "06:00", "07:00", 1).await;

    // Reservations don't hold seats, so every student can reserve first.
    let mut students = Vec::new();
    for _ in 0..8 {
        let student = Ulid::new().to_string();
        admin
            .ok(json!({"op": "add_to_reservation", "student_id": student, "candidate": seat(&batch_id)}))
            .await;
        students.push(student);
    }

    let mut handles = Vec::new();
    for student in students {
        handles.push(tokio::spawn(async move {
            let mut client = Client::connect(addr).await;
            client
                .call(json!({"op": "checkout", "student_id": student, "contact": contact()}))
                .await
        }));
    }
    let mut winners = 0;
    for h in handles {
        let resp = h.await.unwrap();
        if resp.ok {
            winners += 1;
        } else {
            assert_eq!(resp.error.unwrap().code, "capacity_full");
        }
    }
    assert_eq!(winners, 1);
    let id: Ulid = batch_id.parse().unwrap();
    assert_eq!(engine.get_batch(&id).await.unwrap().enrolled_count, 1);
}
