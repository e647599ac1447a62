//! Remote worker: HTTP client driving one service host
//!
//! A remote worker mirrors the local worker's phase loop, but each phase
//! action is a request to the service: prepare (config as JSON), start
//! (phase code and bench ID as query parameters), status polling at the
//! configured interval, final result collection, and interruption. The
//! collected results land in the same per-worker state a local worker
//! would have populated, so the manager aggregates both the same way.

use super::coordination::PhaseCoordination;
use super::{WorkerHandle, WorkerPhaseResults};
use crate::config::{BenchConfig, BenchPathType};
use crate::error::{frame_host_error, WorkerError, WorkerResult};
use crate::phase::BenchPhase;
use crate::service::protocol::{
    self, BenchResultXfer, PreparePhaseResponse, StatusXfer, PROTOCOL_VERSION,
};
use crate::stats::LiveOps;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// HTTP client bound to one service host, acting as one worker of the
/// master process.
pub struct RemoteWorker {
    handle: Arc<WorkerHandle>,
    coord: Arc<PhaseCoordination>,
    config: Arc<BenchConfig>,
    host: String,
    /// Index of this worker among the master's remote workers; used to
    /// compute the per-host rank offset.
    worker_index: usize,
    client: reqwest::blocking::Client,
    num_workers_done: usize,
    num_workers_done_with_error: usize,
}

impl RemoteWorker {
    pub fn new(
        handle: Arc<WorkerHandle>,
        coord: Arc<PhaseCoordination>,
        config: Arc<BenchConfig>,
        host: String,
        worker_index: usize,
    ) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();

        Self {
            handle,
            coord,
            config,
            host,
            worker_index,
            client,
            num_workers_done: 0,
            num_workers_done_with_error: 0,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.host)
    }

    fn framed(&self, msg: impl AsRef<str>) -> WorkerError {
        WorkerError::Failed(frame_host_error(&self.host, self.handle.rank(), msg.as_ref()))
    }

    /// Thread entry point, mirroring the local worker's error handling.
    pub fn run(&mut self) {
        let rank = self.handle.rank();

        match self.run_phases() {
            Ok(()) => {}
            Err(WorkerError::Interrupted) => {
                tracing::debug!(rank, host = %self.host, "remote worker interrupted");

                // interrupt to free service resources even when the phase
                // already finished on the service side
                self.interrupt_bench_phase();

                if !self.handle.phase_finished() {
                    self.finish_phase_logged();
                }
            }
            Err(WorkerError::Failed(msg)) => {
                tracing::error!(rank, host = %self.host, "{msg}");
                crate::service::error_history::append(&msg);

                self.interrupt_bench_phase();
                self.coord.inc_workers_done_with_error();
            }
        }
    }

    fn run_phases(&mut self) -> WorkerResult<()> {
        let mut current_bench_id = Uuid::nil();

        self.prepare_phase()?;

        self.handle.set_phase_finished();
        self.coord.inc_workers_done(&self.handle);

        loop {
            let (phase, bench_id) = self
                .coord
                .wait_for_phase_change(current_bench_id, &self.handle)?;
            current_bench_id = bench_id;

            if phase == BenchPhase::Terminate {
                // interrupt remote threads and close open FDs on the
                // service host
                self.interrupt_bench_phase();

                self.handle.set_phase_finished();
                self.coord.inc_workers_done(&self.handle);
                return Ok(());
            }

            self.start_bench_phase(phase, bench_id)?;
            self.wait_for_bench_phase_completion(bench_id, true)?;
            self.finish_phase(bench_id)?;
        }
    }

    /// POST the config document; the service responds with the path type
    /// it detected plus its error history.
    fn prepare_phase(&mut self) -> WorkerResult<()> {
        let config_doc = self
            .config
            .wire_json_for_host(self.worker_index)
            .map_err(|err| self.framed(err.to_string()))?;

        let url = format!(
            "{}?{}={}",
            self.url(protocol::PATH_PREPARE_PHASE),
            protocol::PARAM_PROTOCOL_VERSION,
            PROTOCOL_VERSION
        );

        let response = self
            .client
            .post(url)
            .json(&config_doc)
            .send()
            .map_err(|err| {
                self.framed(format!("Communication error in preparation phase: {err}"))
            })?;

        if !response.status().is_success() {
            let body = response.text().unwrap_or_default();
            return Err(self.framed(body));
        }

        let reply: PreparePhaseResponse = response.json().map_err(|err| {
            self.framed(format!("Unparsable preparation result: {err}"))
        })?;

        if !reply.error_history.is_empty() {
            return Err(self.framed(reply.error_history));
        }

        let path_type = BenchPathType::from_code(reply.bench_path_type).ok_or_else(|| {
            self.framed(format!(
                "Service reported unknown path type code: {}",
                reply.bench_path_type
            ))
        })?;

        self.handle.set_remote_path_type(path_type);

        Ok(())
    }

    /// GET `/startphase` with phase code and bench ID. Any response body
    /// is the service's error history and means the start failed.
    fn start_bench_phase(&mut self, phase: BenchPhase, bench_id: Uuid) -> WorkerResult<()> {
        self.num_workers_done = 0;
        self.num_workers_done_with_error = 0;

        let url = format!(
            "{}?{}={}&{}={}",
            self.url(protocol::PATH_START_PHASE),
            protocol::PARAM_BENCH_PHASE_CODE,
            phase.code(),
            protocol::PARAM_BENCH_ID,
            bench_id
        );

        let response = self.client.get(url).send().map_err(|err| {
            self.framed(format!("HTTP client error in benchmark phase start: {err}"))
        })?;

        let status = response.status();
        let body = response.text().unwrap_or_default();

        if !status.is_success() || !body.trim().is_empty() {
            return Err(self.framed(body));
        }

        Ok(())
    }

    /// Poll `/status` until all service-side threads are done, mirroring
    /// live counters into the handle so the master's live stats track
    /// remote progress. The first service worker done triggers the
    /// master's stonewall.
    fn wait_for_bench_phase_completion(
        &mut self,
        bench_id: Uuid,
        check_interruption: bool,
    ) -> WorkerResult<()> {
        let sleep_interval = Duration::from_millis(self.config.svc_update_interval_ms.max(1));
        // a short first round so the first live stats line has data
        let first_round_sleep = sleep_interval.min(Duration::from_millis(500)) / 2;
        let mut first_round = true;

        while self.num_workers_done < self.config.threads {
            std::thread::sleep(if first_round {
                first_round_sleep
            } else {
                sleep_interval
            });
            first_round = false;

            if check_interruption {
                self.handle.check_interrupt()?;
            }

            let response = self
                .client
                .get(self.url(protocol::PATH_STATUS))
                .send()
                .map_err(|err| {
                    self.framed(format!("HTTP client error in benchmark phase: {err}"))
                })?;

            if !response.status().is_success() {
                return Err(self.framed(format!(
                    "Service host encountered an error. \
                     Phase: Wait for benchmark completion; HTTP status code: {}",
                    response.status()
                )));
            }

            let status: StatusXfer = response.json().map_err(|err| {
                self.framed(format!("Unparsable status document: {err}"))
            })?;

            if status.bench_id != bench_id.to_string() {
                return Err(
                    self.framed("Service host got hijacked for a different benchmark.")
                );
            }

            self.num_workers_done = status.num_workers_done;
            self.num_workers_done_with_error = status.num_workers_done_with_err;

            let live_ops = status.live_ops();
            if !live_ops.is_zero() {
                self.handle.mark_got_phase_work();
            }
            self.handle.live_ops.store(live_ops);
            self.handle.live_rwmix_read_ops.store(LiveOps {
                entries_done: 0,
                bytes_done: status.rwmix_read_bytes_done.unwrap_or(0),
                iops_done: status.rwmix_read_iops_done.unwrap_or(0),
            });

            if self.num_workers_done_with_error > 0 {
                return Err(self.framed(status.error_history));
            }

            // first service-side finisher anywhere starts the master's
            // stonewall
            if self.num_workers_done > 0 && !self.handle.stonewall_triggered() {
                self.coord.trigger_stonewall_all();
            }
        }

        Ok(())
    }

    /// GET `/benchresult` and store the final counters, elapsed times, CPU
    /// utilization, and histograms into this worker's state.
    fn finish_phase(&mut self, bench_id: Uuid) -> WorkerResult<()> {
        let response = self
            .client
            .get(self.url(protocol::PATH_BENCH_RESULT))
            .send()
            .map_err(|err| {
                self.framed(format!("HTTP client error in finish benchmark phase: {err}"))
            })?;

        if !response.status().is_success() {
            let body = response.text().unwrap_or_default();
            return Err(self.framed(format!(
                "Service host encountered an error. Phase: Finalization; Message: {body}"
            )));
        }

        let result: BenchResultXfer = response.json().map_err(|err| {
            self.framed(format!("Unparsable benchmark result: {err}"))
        })?;

        if result.bench_id != bench_id.to_string() {
            return Err(self.framed("Service host got hijacked for a different benchmark."));
        }

        self.num_workers_done = result.num_workers_done;
        self.num_workers_done_with_error = result.num_workers_done_with_err;

        if result.num_workers_done_with_err > 0 {
            return Err(self.framed(result.error_history));
        }

        if result.num_workers_done < self.config.threads {
            return Err(self.framed(format!(
                "Phase finish handler was called before all workers on the service host \
                 completed. numWorkersDone: {}; numThreads: {}",
                result.num_workers_done, self.config.threads
            )));
        }

        self.handle.live_ops.store(LiveOps {
            entries_done: result.num_entries_done,
            bytes_done: result.num_bytes_done,
            iops_done: result.num_iops_done,
        });
        self.handle.live_rwmix_read_ops.store(LiveOps {
            entries_done: 0,
            bytes_done: result.rwmix_read_bytes_done.unwrap_or(0),
            iops_done: result.rwmix_read_iops_done.unwrap_or(0),
        });

        let iops_latency = result
            .iops_latency
            .to_histogram()
            .map_err(|err| self.framed(err))?;
        let entries_latency = result
            .entries_latency
            .to_histogram()
            .map_err(|err| self.framed(err))?;

        self.handle.publish_results(WorkerPhaseResults {
            elapsed_usec: result.elapsed_usec_list,
            iops_latency,
            entries_latency,
            cpu_util_stonewall_percent: result.cpu_util_stonewall,
            cpu_util_last_percent: result.cpu_util,
        });

        // before the done increment, because the manager may reset stats
        // for the next phase right after the increment
        self.handle.set_phase_finished();

        self.coord.inc_workers_done(&self.handle);

        Ok(())
    }

    /// Best-effort result collection on the interrupt path; errors are
    /// logged instead of raised and the worker still counts as done.
    fn finish_phase_logged(&mut self) {
        let bench_id = {
            let snapshot = self.coord.phase_snapshot();
            snapshot.bench_id
        };

        if let Err(err) = self.finish_phase(bench_id) {
            tracing::debug!(host = %self.host, "result collection after interrupt failed: {err}");

            self.handle.set_phase_finished();
            self.coord.inc_workers_done(&self.handle);
        }
    }

    /// GET `/interruptphase`. Errors are logged, not raised: this runs on
    /// teardown paths.
    fn interrupt_bench_phase(&mut self) {
        match self.client.get(self.url(protocol::PATH_INTERRUPT_PHASE)).send() {
            Ok(response) if !response.status().is_success() => {
                tracing::error!(
                    host = %self.host,
                    "Service host encountered an error. Phase: Interruption; \
                     HTTP status code: {}",
                    response.status()
                );
            }
            Ok(_) => {}
            Err(err) => {
                tracing::error!(host = %self.host, "HTTP client error on benchmark interruption: {err}");
            }
        }
    }
}

/// One-shot remote-control command: interrupt the given service's current
/// phase, optionally telling it to quit. Used for `--interrupt`/`--quit`.
/// Connection refused on a quit request is expected (the service may be
/// gone already) and only logged at debug level.
pub fn send_interrupt_request(host: &str, quit: bool) -> crate::Result<()> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    let url = if quit {
        format!(
            "http://{host}{}?{}",
            protocol::PATH_INTERRUPT_PHASE,
            protocol::PARAM_QUIT
        )
    } else {
        format!("http://{host}{}", protocol::PATH_INTERRUPT_PHASE)
    };

    match client.get(url).send() {
        Ok(response) if response.status().is_success() => {
            println!("Service interrupted. Host: {host}");
            Ok(())
        }
        Ok(response) => anyhow::bail!(
            "service returned an error. Host: {host}; HTTP status code: {}",
            response.status()
        ),
        Err(err) if quit && err.is_connect() => {
            tracing::debug!(host, "connection refused on quit request (service already gone)");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}
