//! JSON-lines request surface over TCP.
//!
//! Each line a client sends is one `Request` object tagged by `op`; the server
//! answers every line with exactly one `Response` line, in order.

use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::debug;
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::limits::MAX_REQUEST_LINE_LEN;
use crate::model::*;
use crate::observability::{request_label, REQUESTS_TOTAL, REQUEST_DURATION_SECONDS};
use crate::pattern::weekdays_of;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    RegisterBusiness {
        #[serde(default)]
        id: Option<Ulid>,
        name: String,
        /// Pattern code, e.g. `"Mon-Sat"`.
        operating_days: String,
    },
    SaveBatch {
        batch: BatchSpec,
    },
    CancelBatch {
        batch_id: Ulid,
    },
    GetBatch {
        batch_id: Ulid,
    },
    ListBatches {
        #[serde(default)]
        business_id: Option<Ulid>,
    },
    CheckAdd {
        student_id: Ulid,
        candidate: Candidate,
    },
    AddToReservation {
        student_id: Ulid,
        candidate: Candidate,
    },
    RemoveFromReservation {
        student_id: Ulid,
        item_id: Ulid,
    },
    ClearReservation {
        student_id: Ulid,
    },
    RemainingSeconds {
        student_id: Ulid,
    },
    GetReservation {
        student_id: Ulid,
    },
    Checkout {
        student_id: Ulid,
        contact: Contact,
    },
    CancelEnrollment {
        enrollment_id: Ulid,
    },
    SwitchEnrollment {
        enrollment_id: Ulid,
        new_batch_id: Ulid,
    },
    SetAutoRenew {
        enrollment_id: Ulid,
        auto_renew: bool,
    },
    GetEnrollment {
        enrollment_id: Ulid,
    },
    StudentEnrollments {
        student_id: Ulid,
    },
    GetTransaction {
        transaction_id: Ulid,
    },
    StudentTransactions {
        student_id: Ulid,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict: Option<ScheduleConflict>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_remaining: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(code: &str, message: String) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(ErrorBody {
                code: code.to_string(),
                message,
                conflict: None,
                days_remaining: None,
            }),
        }
    }

    pub fn from_engine_error(e: &EngineError) -> Self {
        let mut response = Self::error(e.code(), e.to_string());
        if let Some(body) = response.error.as_mut() {
            match e {
                EngineError::ScheduleConflict(c) | EngineError::TeacherConflict(c) => {
                    body.conflict = Some(c.clone());
                }
                EngineError::Locked { days_remaining } => {
                    body.days_remaining = Some(*days_remaining);
                }
                _ => {}
            }
        }
        response
    }
}

fn to_json<T: Serialize>(value: T) -> Result<Value, EngineError> {
    serde_json::to_value(value).map_err(|e| EngineError::Validation(format!("encode: {e}")))
}

fn found<T: Serialize>(value: Option<T>, id: Ulid) -> Result<Value, EngineError> {
    to_json(value.ok_or(EngineError::NotFound(id))?)
}

async fn execute(engine: &Engine, req: Request) -> Result<Value, EngineError> {
    match req {
        Request::RegisterBusiness {
            id,
            name,
            operating_days,
        } => {
            let id = id.unwrap_or_else(Ulid::new);
            to_json(
                engine
                    .register_business(id, name, weekdays_of(&operating_days))
                    .await?,
            )
        }
        Request::SaveBatch { batch } => to_json(engine.create_or_edit_batch(batch).await?),
        Request::CancelBatch { batch_id } => to_json(engine.cancel_batch(batch_id).await?),
        Request::GetBatch { batch_id } => found(engine.get_batch(&batch_id).await, batch_id),
        Request::ListBatches { business_id } => to_json(engine.list_batches(business_id).await),
        Request::CheckAdd {
            student_id,
            candidate,
        } => to_json(engine.check_add(student_id, &candidate).await?),
        Request::AddToReservation {
            student_id,
            candidate,
        } => to_json(engine.add_to_reservation(student_id, candidate).await?),
        Request::RemoveFromReservation {
            student_id,
            item_id,
        } => {
            engine.remove_from_reservation(student_id, item_id).await?;
            Ok(Value::Null)
        }
        Request::ClearReservation { student_id } => {
            engine.clear_reservation(student_id).await;
            Ok(Value::Null)
        }
        Request::RemainingSeconds { student_id } => {
            let seconds = engine.remaining_reservation_seconds(student_id).await;
            Ok(json!({ "remaining_seconds": seconds }))
        }
        Request::GetReservation { student_id } => {
            to_json(engine.get_reservation(student_id).await)
        }
        Request::Checkout {
            student_id,
            contact,
        } => to_json(engine.checkout(student_id, contact).await?),
        Request::CancelEnrollment { enrollment_id } => {
            to_json(engine.cancel_enrollment(enrollment_id).await?)
        }
        Request::SwitchEnrollment {
            enrollment_id,
            new_batch_id,
        } => to_json(engine.switch_enrollment(enrollment_id, new_batch_id).await?),
        Request::SetAutoRenew {
            enrollment_id,
            auto_renew,
        } => to_json(engine.set_auto_renew(enrollment_id, auto_renew).await?),
        Request::GetEnrollment { enrollment_id } => {
            found(engine.get_enrollment(&enrollment_id), enrollment_id)
        }
        Request::StudentEnrollments { student_id } => {
            to_json(engine.student_enrollments(&student_id))
        }
        Request::GetTransaction { transaction_id } => {
            found(engine.get_transaction(&transaction_id), transaction_id)
        }
        Request::StudentTransactions { student_id } => {
            to_json(engine.student_transactions(&student_id))
        }
    }
}

/// Run one request against the engine, recording RED metrics.
pub async fn handle_request(engine: &Engine, req: Request) -> Response {
    let label = request_label(&req);
    let start = Instant::now();
    let result = execute(engine, req).await;
    metrics::histogram!(REQUEST_DURATION_SECONDS, "op" => label)
        .record(start.elapsed().as_secs_f64());
    match result {
        Ok(data) => {
            metrics::counter!(REQUESTS_TOTAL, "op" => label, "status" => "ok").increment(1);
            Response::ok(data)
        }
        Err(e) => {
            metrics::counter!(REQUESTS_TOTAL, "op" => label, "status" => e.code()).increment(1);
            debug!("{label} failed: {e}");
            Response::from_engine_error(&e)
        }
    }
}

/// Serve one client until it disconnects.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_REQUEST_LINE_LEN));
    while let Some(line) = framed.next().await {
        let response = match line {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => match serde_json::from_str::<Request>(&line) {
                Ok(req) => handle_request(&engine, req).await,
                Err(e) => Response::error("bad_request", e.to_string()),
            },
            Err(LinesCodecError::MaxLineLengthExceeded) => Response::error(
                "limit_exceeded",
                format!("request line longer than {MAX_REQUEST_LINE_LEN} bytes"),
            ),
            Err(LinesCodecError::Io(e)) => return Err(e.into()),
        };
        framed.send(serde_json::to_string(&response)?).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::{ManualClock, MemoryLog};
    use chrono::NaiveDate;

    fn engine() -> Engine {
        let clock = ManualClock::at_date(NaiveDate::from_ymd_opt(2026, 3, 2).unwrap());
        Engine::new(
            Arc::new(MemoryLog::new()),
            EngineConfig::default(),
            Arc::new(clock),
        )
    }

    #[test]
    fn request_is_tagged_by_op() {
        let id = Ulid::new();
        let req: Request =
            serde_json::from_str(&format!(r#"{{"op":"cancel_batch","batch_id":"{id}"}}"#)).unwrap();
        assert_eq!(req, Request::CancelBatch { batch_id: id });
        assert!(serde_json::from_str::<Request>(r#"{"op":"drop_tables"}"#).is_err());
    }

    #[test]
    fn candidate_parses_from_json() {
        let batch_id = Ulid::new();
        let json = format!(
            r#"{{"target":{{"batch":{{"batch_id":"{batch_id}"}}}},"tier":"monthly","start_date":"2026-03-02","price":1500}}"#
        );
        let c: Candidate = serde_json::from_str(&json).unwrap();
        assert_eq!(c.target, BookingTarget::Batch { batch_id });
        assert_eq!(c.slot, None);
        assert!(!c.auto_renew);
    }

    #[tokio::test]
    async fn engine_errors_carry_code_and_detail() {
        let engine = engine();
        let biz = Ulid::new();
        let resp = handle_request(
            &engine,
            Request::RegisterBusiness {
                id: Some(biz),
                name: "Studio".into(),
                operating_days: "daily".into(),
            },
        )
        .await;
        assert!(resp.ok);

        let batch = |start: &str| BatchSpec {
            id: None,
            business_id: biz,
            name: "Yoga".into(),
            teacher: "J. Rao".into(),
            pattern: "Mon/Wed/Fri".into(),
            start_time: start.into(),
            end_time: "17:30".into(),
            capacity: 4,
            start_date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2026, 6, 30).unwrap(),
        };
        let resp = handle_request(&engine, Request::SaveBatch { batch: batch("16:00") }).await;
        assert!(resp.ok);
        let resp = handle_request(&engine, Request::SaveBatch { batch: batch("17:00") }).await;
        let error = resp.error.unwrap();
        assert_eq!(error.code, "teacher_conflict");
        assert_eq!(error.conflict.unwrap().overlap_minutes, 30);
    }

    #[tokio::test]
    async fn missing_entities_are_not_found() {
        let engine = engine();
        let id = Ulid::new();
        let resp = handle_request(&engine, Request::GetEnrollment { enrollment_id: id }).await;
        assert!(!resp.ok);
        assert_eq!(resp.error.unwrap().code, "not_found");
    }

    #[test]
    fn empty_reservation_has_no_timer() {
        let engine = engine();
        let student_id = Ulid::new();
        let resp = tokio_test::block_on(handle_request(
            &engine,
            Request::RemainingSeconds { student_id },
        ));
        assert_eq!(resp.data, Some(json!({ "remaining_seconds": 0 })));

        let resp = tokio_test::block_on(handle_request(
            &engine,
            Request::Checkout {
                student_id,
                contact: Contact {
                    name: "Asha".into(),
                    phone: "555".into(),
                    email: None,
                },
            },
        ));
        assert_eq!(resp.error.unwrap().code, "empty_reservation");
    }

    #[test]
    fn locked_error_exposes_days() {
        let resp = Response::from_engine_error(&EngineError::Locked { days_remaining: 20 });
        let text = serde_json::to_string(&resp).unwrap();
        assert!(text.contains(r#""days_remaining":20"#));
        assert!(!text.contains("data"));
    }
}
