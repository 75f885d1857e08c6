//! Test doubles shared by the controller, timer and submission tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use machines_api::{AttemptRequest, Reply, StatusCode};
use serde_json::{Value, json};

use crate::MachineBackend;
use crate::session::Clock;
use crate::ui::{Surface, UiCommand, UiSink};

pub fn origin() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 18, 10, 0, 0).unwrap()
}

/// Wall clock that follows tokio's (pausable) clock, starting at [`origin`].
pub struct TokioClock {
    started: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            started: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        origin() + chrono::Duration::from_std(self.started.elapsed()).unwrap()
    }
}

pub fn reply(status: u16, body: Value) -> Reply {
    Reply::from_json(StatusCode::from_u16(status).unwrap(), body, "test").unwrap()
}

pub fn transport_error() -> machines_api::Error {
    machines_api::Error::Decode {
        endpoint: "test",
        source: serde_json::from_str::<Value>("<html>").unwrap_err(),
    }
}

pub fn status_reply(last_status: &str, public_ip: &str, containers: Value, time_end: DateTime<Utc>) -> Reply {
    let detail = json!({
        "launchType": "FARGATE",
        "taskArn": "arn:aws:ecs:task/abc",
        "lastStatus": last_status,
        "publicIp": public_ip,
        "containers": containers,
    });
    reply(
        200,
        json!({
            "success": true,
            "data": {
                "id": 1,
                "chall_id": 7,
                "status": 1,
                "time_str": origin().naive_utc().format("%Y-%m-%dT%H:%M:%S").to_string(),
                "time_end": time_end.naive_utc().format("%Y-%m-%dT%H:%M:%S").to_string(),
                "detail": detail.to_string(),
            }
        }),
    )
}

pub fn pending() -> Reply {
    status_reply("PENDING", "", json!([]), origin() + chrono::Duration::seconds(3600))
}

pub fn running(time_end: DateTime<Utc>) -> Reply {
    status_reply(
        "RUNNING",
        "203.0.113.7",
        json!([{"name": "web", "portMappings": [{"hostPort": 8080}]}]),
        time_end,
    )
}

pub fn ok() -> Reply {
    reply(200, json!({"success": true}))
}

type Scripted = (Duration, machines_api::Result<Reply>);

/// Backend answering from per-endpoint queues; an empty queue is a transport failure.
#[derive(Default)]
pub struct ScriptedBackend {
    starts: Mutex<VecDeque<Scripted>>,
    statuses: Mutex<VecDeque<Scripted>>,
    terminates: Mutex<VecDeque<Scripted>>,
    attempts: Mutex<VecDeque<Scripted>>,
    pub start_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
    pub terminate_calls: AtomicUsize,
    pub attempt_calls: Mutex<Vec<(i64, String, bool)>>,
}

impl ScriptedBackend {
    pub fn push_start(&self, result: machines_api::Result<Reply>) {
        self.push_start_after(Duration::ZERO, result);
    }

    pub fn push_start_after(&self, delay: Duration, result: machines_api::Result<Reply>) {
        self.starts.lock().unwrap().push_back((delay, result));
    }

    pub fn push_status(&self, result: machines_api::Result<Reply>) {
        self.push_status_after(Duration::ZERO, result);
    }

    pub fn push_status_after(&self, delay: Duration, result: machines_api::Result<Reply>) {
        self.statuses.lock().unwrap().push_back((delay, result));
    }

    pub fn push_terminate(&self, result: machines_api::Result<Reply>) {
        self.push_terminate_after(Duration::ZERO, result);
    }

    pub fn push_terminate_after(&self, delay: Duration, result: machines_api::Result<Reply>) {
        self.terminates.lock().unwrap().push_back((delay, result));
    }

    pub fn push_attempt(&self, result: machines_api::Result<Reply>) {
        self.attempts.lock().unwrap().push_back((Duration::ZERO, result));
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    async fn next(queue: &Mutex<VecDeque<Scripted>>, counter: &AtomicUsize) -> machines_api::Result<Reply> {
        counter.fetch_add(1, Ordering::SeqCst);
        let step = queue.lock().unwrap().pop_front();
        match step {
            Some((delay, result)) => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                result
            }
            None => Err(transport_error()),
        }
    }
}

#[async_trait]
impl MachineBackend for ScriptedBackend {
    async fn start_machine(&self, _challenge_id: i64) -> machines_api::Result<Reply> {
        Self::next(&self.starts, &self.start_calls).await
    }

    async fn machine_status(&self, _challenge_id: i64) -> machines_api::Result<Reply> {
        Self::next(&self.statuses, &self.status_calls).await
    }

    async fn terminate_machine(&self, _challenge_id: i64) -> machines_api::Result<Reply> {
        Self::next(&self.terminates, &self.terminate_calls).await
    }

    async fn submit_attempt(&self, attempt: &AttemptRequest, preview: bool) -> machines_api::Result<Reply> {
        self.attempt_calls
            .lock()
            .unwrap()
            .push((attempt.challenge_id, attempt.submission.clone(), preview));
        let unused = AtomicUsize::new(0);
        Self::next(&self.attempts, &unused).await
    }
}

/// Sink that applies commands to a [`Surface`] and keeps the raw log.
#[derive(Default)]
pub struct RecordingSink {
    surface: Mutex<Surface>,
    log: Mutex<Vec<UiCommand>>,
}

impl RecordingSink {
    pub fn surface(&self) -> Surface {
        self.surface.lock().unwrap().clone()
    }

    pub fn commands(&self) -> Vec<UiCommand> {
        self.log.lock().unwrap().clone()
    }
}

impl UiSink for RecordingSink {
    fn apply(&self, commands: &[UiCommand]) {
        let mut surface = self.surface.lock().unwrap();
        for command in commands {
            surface.apply(command);
        }
        self.log.lock().unwrap().extend_from_slice(commands);
    }
}
