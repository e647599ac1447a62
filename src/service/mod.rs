//! HTTP service process
//!
//! The service exposes the remote-control protocol and forwards to a local
//! worker manager. Every request that touches phase state serializes on the
//! service's own mutex; the manager's shared state provides the ordering
//! between phase transitions and workers.
//!
//! Endpoint semantics (see `protocol` for the wire shapes):
//! - `GET /info`: human-readable service info (HTML)
//! - `GET /protocolversion`: version string
//! - `GET /status`: live counters plus error history
//! - `GET /benchresult`: final counters, histograms, elapsed list; also
//!   prints the local results to the service console
//! - `POST /preparephase?protocolversion=`: interrupts and joins any
//!   running workers, clears the error history, applies the posted config,
//!   and prepares new worker threads
//! - `GET /startphase?benchphasecode=&benchid=`: starts the given phase
//! - `GET /interruptphase[?quit]`: interrupts workers; with `quit`, shuts
//!   the listener down after responding

pub mod protocol;

use crate::config::BenchConfig;
use crate::device::Capabilities;
use crate::phase::BenchPhase;
use crate::stats;
use crate::worker::WorkerManager;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use protocol::{BenchResultXfer, PreparePhaseResponse, StatusXfer, PROTOCOL_VERSION};
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use uuid::Uuid;

pub mod error_history {
    //! Process-wide error history
    //!
    //! Worker errors since the last phase preparation, returned in
    //! protocol responses so the master can show the real failure instead
    //! of a bare "worker encountered error". Initialized when the service
    //! starts; appends before that are dropped (local mode logs to stderr
    //! instead).

    use parking_lot::Mutex;
    use std::sync::OnceLock;

    static HISTORY: OnceLock<Mutex<String>> = OnceLock::new();

    pub fn init() {
        let _ = HISTORY.set(Mutex::new(String::new()));
    }

    pub fn append(msg: &str) {
        if let Some(history) = HISTORY.get() {
            let mut guard = history.lock();
            if !guard.is_empty() {
                guard.push('\n');
            }
            guard.push_str(msg);
        }
    }

    pub fn clear() {
        if let Some(history) = HISTORY.get() {
            history.lock().clear();
        }
    }

    pub fn get() -> String {
        HISTORY.get().map(|history| history.lock().clone()).unwrap_or_default()
    }
}

/// Shared state of the service process. The manager only exists between a
/// prepare request and the following interrupt (or the next prepare).
pub struct ServiceState {
    manager: Mutex<Option<WorkerManager>>,
    capabilities: Capabilities,
    shutdown: Mutex<Option<tokio::sync::oneshot::Sender<()>>>,
}

impl ServiceState {
    pub fn new(capabilities: Capabilities) -> Self {
        Self {
            manager: Mutex::new(None),
            capabilities,
            shutdown: Mutex::new(None),
        }
    }

    /// Apply a prepare request: tear down any previous benchmark, parse
    /// and apply the config, and prepare new worker threads.
    pub fn prepare(&self, config_json: &[u8]) -> Result<PreparePhaseResponse, String> {
        let mut manager_slot = self.manager.lock();

        // we are about to replace the config that running workers
        // reference, so stop and join them first
        if let Some(manager) = manager_slot.as_mut() {
            manager.interrupt_and_notify_workers();
            manager.join_all_threads();
        }
        *manager_slot = None;

        error_history::clear();

        let mut config = BenchConfig::from_wire_json(config_json).map_err(|err| err.to_string())?;
        config.open_bench_paths().map_err(|err| err.to_string())?;
        let config = Arc::new(config);

        let mut manager = WorkerManager::new(
            config.clone(),
            self.capabilities.clone(),
            Arc::new(AtomicBool::new(false)),
        );

        manager.prepare_threads().map_err(|err| err.to_string())?;

        let response = PreparePhaseResponse {
            bench_path_type: config.bench_path_type().code(),
            error_history: error_history::get(),
        };

        *manager_slot = Some(manager);

        Ok(response)
    }

    pub fn start_phase(&self, phase: BenchPhase, bench_id: Option<Uuid>) -> Result<(), String> {
        let manager_slot = self.manager.lock();

        let manager = manager_slot
            .as_ref()
            .ok_or_else(|| "no benchmark prepared".to_string())?;

        manager.start_next_phase(phase, bench_id);

        Ok(())
    }

    pub fn status(&self) -> StatusXfer {
        let manager_slot = self.manager.lock();

        match manager_slot.as_ref() {
            Some(manager) => manager.live_status(),
            None => StatusXfer::idle(error_history::get()),
        }
    }

    pub fn bench_result(&self) -> Result<BenchResultXfer, String> {
        let manager_slot = self.manager.lock();

        let manager = manager_slot
            .as_ref()
            .ok_or_else(|| "no benchmark prepared".to_string())?;

        let result = manager.bench_result();

        // show results when running in foreground
        stats::print_results_table_header();
        stats::print_phase_results(&manager.phase_results());

        Ok(result)
    }

    /// Interrupt the current phase. Workers that are already done advance
    /// to the terminate phase instead; afterwards everything is joined and
    /// the benchmark state (including open path FDs) is released.
    pub fn interrupt(&self) -> String {
        let mut manager_slot = self.manager.lock();

        if let Some(manager) = manager_slot.as_mut() {
            if manager.check_workers_done() {
                manager.start_next_phase(BenchPhase::Terminate, None);
            } else {
                manager.interrupt_and_notify_workers();
            }

            manager.join_all_threads();
        }

        *manager_slot = None;

        error_history::get()
    }

    fn request_shutdown(&self) {
        if let Some(sender) = self.shutdown.lock().take() {
            let _ = sender.send(());
        }
    }
}

/// Run the service until a quit request arrives. Does not return earlier
/// on success.
pub async fn run_service(port: u16, capabilities: Capabilities) -> crate::Result<()> {
    error_history::init();

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

    let state = Arc::new(ServiceState::new(capabilities));
    *state.shutdown.lock() = Some(shutdown_tx);

    let app = Router::new()
        .route(protocol::PATH_INFO, get(handle_info))
        .route(protocol::PATH_PROTOCOL_VERSION, get(handle_protocol_version))
        .route(protocol::PATH_STATUS, get(handle_status))
        .route(protocol::PATH_BENCH_RESULT, get(handle_bench_result))
        .route(protocol::PATH_PREPARE_PHASE, post(handle_prepare_phase))
        .route(protocol::PATH_START_PHASE, get(handle_start_phase))
        .route(protocol::PATH_INTERRUPT_PHASE, get(handle_interrupt_phase))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|err| anyhow::anyhow!("unable to listen on service port {port}: {err}"))?;

    println!("Service now listening. Port: {port}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        })
        .await?;

    println!("Service stopped listening. Port: {port}");

    Ok(())
}

async fn handle_info() -> Html<String> {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());

    Html(format!(
        "<h1>iosurge service</h1>\
         <p>Host: {host}</p>\
         <p>Version: {}</p>\
         <p>Protocol version: {PROTOCOL_VERSION}</p>",
        env!("CARGO_PKG_VERSION")
    ))
}

async fn handle_protocol_version() -> &'static str {
    PROTOCOL_VERSION
}

async fn handle_status(State(state): State<Arc<ServiceState>>) -> Response {
    let status = tokio::task::spawn_blocking(move || state.status()).await;

    match status {
        Ok(status) => Json(status).into_response(),
        Err(err) => internal_error(err).into_response(),
    }
}

async fn handle_bench_result(State(state): State<Arc<ServiceState>>) -> Response {
    let result = tokio::task::spawn_blocking(move || state.bench_result()).await;

    match result {
        Ok(Ok(result)) => Json(result).into_response(),
        Ok(Err(msg)) => (StatusCode::BAD_REQUEST, msg).into_response(),
        Err(err) => internal_error(err).into_response(),
    }
}

async fn handle_prepare_phase(
    State(state): State<Arc<ServiceState>>,
    Query(params): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    tracing::debug!("HTTP: preparephase");

    let Some(master_version) = params.get(protocol::PARAM_PROTOCOL_VERSION) else {
        return (
            StatusCode::BAD_REQUEST,
            format!("Missing parameter: {}", protocol::PARAM_PROTOCOL_VERSION),
        )
            .into_response();
    };

    if master_version != PROTOCOL_VERSION {
        return (
            StatusCode::BAD_REQUEST,
            format!(
                "Protocol version mismatch. Service version: {PROTOCOL_VERSION}; \
                 Received master version: {master_version}"
            ),
        )
            .into_response();
    }

    let result = tokio::task::spawn_blocking(move || state.prepare(&body)).await;

    match result {
        Ok(Ok(reply)) => Json(reply).into_response(),
        Ok(Err(msg)) => {
            tracing::error!("prepare phase failed: {msg}");
            (StatusCode::BAD_REQUEST, msg).into_response()
        }
        Err(err) => internal_error(err).into_response(),
    }
}

async fn handle_start_phase(
    State(state): State<Arc<ServiceState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    tracing::debug!("HTTP: startphase");

    let Some(phase) = params
        .get(protocol::PARAM_BENCH_PHASE_CODE)
        .and_then(|code| code.parse::<u8>().ok())
        .and_then(BenchPhase::from_code)
    else {
        return (
            StatusCode::BAD_REQUEST,
            format!("Missing or invalid parameter: {}", protocol::PARAM_BENCH_PHASE_CODE),
        )
            .into_response();
    };

    let bench_id = params
        .get(protocol::PARAM_BENCH_ID)
        .and_then(|id| Uuid::parse_str(id).ok());

    let result = tokio::task::spawn_blocking(move || state.start_phase(phase, bench_id)).await;

    match result {
        Ok(Ok(())) => error_history::get().into_response(),
        Ok(Err(msg)) => (StatusCode::BAD_REQUEST, msg).into_response(),
        Err(err) => internal_error(err).into_response(),
    }
}

async fn handle_interrupt_phase(
    State(state): State<Arc<ServiceState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let quit_requested = params.contains_key(protocol::PARAM_QUIT);

    tracing::debug!(quit_requested, "HTTP: interruptphase");

    let interrupt_state = state.clone();
    let result = tokio::task::spawn_blocking(move || interrupt_state.interrupt()).await;

    let response = match result {
        Ok(history) => history.into_response(),
        Err(err) => internal_error(err).into_response(),
    };

    if quit_requested {
        tracing::info!("shutting down as requested by client");
        state.request_shutdown();
    }

    response
}

fn internal_error(err: tokio::task::JoinError) -> (StatusCode, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("service task failed: {err}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::LiveOps;

    fn prepare_json(dir: &tempfile::TempDir) -> Vec<u8> {
        let config = BenchConfig {
            path: dir.path().display().to_string(),
            threads: 2,
            dirs: 1,
            files: 2,
            size: 16 << 10,
            block: 8 << 10,
            run_create_dirs: true,
            run_create_files: true,
            ..Default::default()
        };
        serde_json::to_vec(&config).unwrap()
    }

    #[test]
    fn test_prepare_start_result_cycle() {
        error_history::init();

        let dir = tempfile::tempdir().unwrap();
        let state = ServiceState::new(Capabilities::none());

        let reply = state.prepare(&prepare_json(&dir)).unwrap();
        assert_eq!(reply.bench_path_type, 0); // dir mode

        // status is idle-phase before the first start
        let status = state.status();
        assert_eq!(status.phase_code, BenchPhase::Idle.code());
        assert_eq!(status.num_workers_done, 0);

        let bench_id = Uuid::new_v4();
        state
            .start_phase(BenchPhase::CreateDirs, Some(bench_id))
            .unwrap();

        // wait for the phase to complete
        {
            let slot = state.manager.lock();
            slot.as_ref().unwrap().wait_for_workers_done().unwrap();
        }

        let status = state.status();
        assert_eq!(status.bench_id, bench_id.to_string());
        assert_eq!(status.num_workers_done, 2);

        state.start_phase(BenchPhase::CreateFiles, None).unwrap();
        {
            let slot = state.manager.lock();
            slot.as_ref().unwrap().wait_for_workers_done().unwrap();
        }

        let result = state.bench_result().unwrap();
        assert_eq!(result.phase_code, BenchPhase::CreateFiles.code());
        assert_eq!(result.num_workers_done, 2);
        assert_eq!(result.elapsed_usec_list.len(), 2);
        assert_eq!(
            LiveOps {
                entries_done: result.num_entries_done,
                bytes_done: result.num_bytes_done,
                iops_done: result.num_iops_done,
            }
            .bytes_done,
            2 * 2 * (16 << 10)
        );

        // interrupting with all workers done terminates them cleanly
        let _history = state.interrupt();
        assert!(state.manager.lock().is_none());
    }

    #[test]
    fn test_prepare_rejects_bad_config() {
        error_history::init();

        let state = ServiceState::new(Capabilities::none());
        let result = state.prepare(br#"{"path": "/tmp/x", "nonsense": true}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_start_without_prepare_fails() {
        let state = ServiceState::new(Capabilities::none());
        assert!(state.start_phase(BenchPhase::CreateDirs, None).is_err());
        assert!(state.bench_result().is_err());
    }

    // end-to-end master/service round trip over real localhost HTTP
    #[test]
    fn test_remote_master_round_trip() {
        use crate::worker::WorkerManager;

        error_history::init();

        let dir = tempfile::tempdir().unwrap();

        let port = {
            let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            probe.local_addr().unwrap().port()
        };

        // service process stand-in: own runtime on a background thread
        let service_thread = std::thread::spawn(move || {
            let runtime = tokio::runtime::Runtime::new().unwrap();
            runtime.block_on(run_service(port, Capabilities::none())).unwrap();
        });

        // wait for the listener to come up
        let host = format!("127.0.0.1:{port}");
        for _ in 0..100 {
            if std::net::TcpStream::connect(&host).is_ok() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(50));
        }

        // master: one remote worker driving the service with 2 threads
        let master_config = Arc::new(BenchConfig {
            path: dir.path().display().to_string(),
            threads: 2,
            dirs: 1,
            files: 3,
            size: 8 << 10,
            block: 8 << 10,
            run_create_dirs: true,
            run_create_files: true,
            hosts: vec![host.clone()],
            svc_update_interval_ms: 50,
            ..Default::default()
        });

        let mut manager = WorkerManager::new(
            master_config,
            Capabilities::none(),
            Arc::new(AtomicBool::new(false)),
        );

        manager.prepare_threads().unwrap();
        let path_type = manager.check_service_path_types().unwrap();
        assert_eq!(path_type, crate::config::BenchPathType::Dir);

        manager.start_next_phase(BenchPhase::CreateDirs, None);
        manager.wait_for_workers_done().unwrap();

        manager.start_next_phase(BenchPhase::CreateFiles, None);
        manager.wait_for_workers_done().unwrap();

        let results = manager.phase_results();
        // the remote worker mirrors the service's 2 threads x 1 dir x 3 files
        assert_eq!(results.total_ops.entries_done, 2 * 3);
        assert_eq!(results.total_ops.bytes_done, 2 * 3 * (8 << 10));
        // one elapsed entry per service-side thread
        let elapsed = manager.coordination().workers()[0].results().elapsed_usec;
        assert_eq!(elapsed.len(), 2);
        assert!(results.iops_latency.num_values() > 0);
        assert_eq!(results.percent_done(), 100);

        // the service really created the files in the shared temp dir
        assert!(dir.path().join("r0/d0/f2").is_file());
        assert!(dir.path().join("r1/d0/f0").is_file());

        // terminate the remote worker, then quit the service listener
        manager.start_next_phase(BenchPhase::Terminate, None);
        manager.wait_for_workers_done().unwrap();
        manager.join_all_threads();

        crate::worker::remote::send_interrupt_request(&host, true).unwrap();
        service_thread.join().unwrap();
    }

    #[test]
    fn test_second_prepare_replaces_first() {
        error_history::init();

        let dir = tempfile::tempdir().unwrap();
        let state = ServiceState::new(Capabilities::none());

        state.prepare(&prepare_json(&dir)).unwrap();
        // a new prepare request must tear down and replace the old workers
        state.prepare(&prepare_json(&dir)).unwrap();

        assert!(state.manager.lock().is_some());

        state.interrupt();
    }
}
