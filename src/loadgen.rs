use core::{
    fmt::{self, Debug, Formatter},
    mem,
    time::Duration,
};
use std::{
    collections::HashMap,
    io::{self, Write},
    sync::{Arc, Mutex},
    thread,
};

use crossterm::event::KeyCode;
use thiserror::Error;
use tokio::{
    runtime::Handle,
    sync::mpsc::{self, Receiver, Sender},
};

pub use crate::limits::MAX_CONCURRENCY;
use crate::{
    job::JobProducer,
    limits::Limits,
    stat::RunStat,
    ui::{self, widget::LoadLimitsWidget, Ui},
};

/// Load test configuration.
pub struct Config {
    /// Number of jobs to attempt; 0 means unbounded.
    pub number: u64,
    /// Initial in-flight cap; 0 defaults to 50.
    pub concurrency: u64,
    /// Initial requests-per-second cap; 0 means unlimited.
    pub rate_limit: u64,
    /// Wall-clock limit; zero means unbounded.
    pub duration: Duration,
    /// Threshold beyond which a job is counted as slow.
    pub slow_response: Duration,
    /// Whether to drive the live dashboard.
    pub live_ui: bool,
    /// Destination of the final report; standard output when absent.
    pub output: Option<Box<dyn Write + Send>>,
    /// Extra key handlers, checked before the built-in bindings.
    pub key_pressed: HashMap<KeyCode, Box<dyn FnMut() + Send>>,
    /// Invoked with the load limits widget before each render.
    pub prepare_load_limits: Option<Box<dyn FnMut(&mut LoadLimitsWidget) + Send>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            number: 0,
            concurrency: 50,
            rate_limit: 0,
            duration: Duration::ZERO,
            slow_response: Duration::from_secs(1),
            live_ui: false,
            output: None,
            key_pressed: HashMap::new(),
            prepare_load_limits: None,
        }
    }
}

impl Debug for Config {
    fn fmt(&self, fmt: &mut Formatter) -> Result<(), fmt::Error> {
        fmt.debug_struct("Config")
            .field("number", &self.number)
            .field("concurrency", &self.concurrency)
            .field("rate_limit", &self.rate_limit)
            .field("duration", &self.duration)
            .field("slow_response", &self.slow_response)
            .field("live_ui", &self.live_ui)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to initialize terminal ui: {0}")]
    Ui(#[source] io::Error),
    #[error("all requests failed: {0}")]
    AllFailed(#[source] anyhow::Error),
    #[error("i/o error")]
    Io(#[from] io::Error),
}

pub(crate) type SharedOutput = Arc<Mutex<Box<dyn Write + Send>>>;

/// Runs load testing.
///
/// Returns successfully if at least one job completed and a failure carrying
/// the last observed job error if all attempted jobs failed.
pub async fn run<P>(mut cfg: Config, producer: Arc<P>) -> Result<(), Error>
where
    P: JobProducer,
{
    if cfg.number == 0 && cfg.duration.is_zero() {
        cfg.number = 1000;
        cfg.duration = Duration::from_secs(60);
    }

    let concurrency = match cfg.concurrency {
        0 => 50,
        v => v.min(MAX_CONCURRENCY),
    };
    let number = if cfg.number == 0 { i32::MAX as u64 } else { cfg.number };
    let duration = if cfg.duration.is_zero() {
        Duration::from_secs(1000 * 3600)
    } else {
        cfg.duration
    };

    let output: SharedOutput = Arc::new(Mutex::new(
        cfg.output.take().unwrap_or_else(|| Box::new(io::stdout())),
    ));
    let stat = Arc::new(RunStat::new(concurrency, cfg.rate_limit));

    let (exit_tx, exit_rx) = mpsc::channel(1);

    // The terminal is initialized before any dispatch; a broken terminal
    // must fail the run before the first job is launched.
    let ui_thread = match cfg.live_ui {
        true => {
            let terminal = ui::init().map_err(Error::Ui)?;

            let counts = {
                let producer = producer.clone();
                Box::new(move || producer.request_counts())
            };
            let ui = Ui::new(
                stat.clone(),
                Limits::new(stat.clone(), Handle::current()),
                exit_tx.clone(),
                counts,
                mem::take(&mut cfg.key_pressed),
                cfg.prepare_load_limits.take(),
            );

            let thread = thread::Builder::new()
                .name("ui".into())
                .spawn(move || ui::run(ui, terminal))?;

            Some(thread)
        }
        false => None,
    };

    tokio::spawn(signal_fanout(exit_tx));
    tokio::spawn(exit_policy(exit_rx, stat.clone(), output.clone(), cfg.live_ui));

    let runner = Runner {
        stat: stat.clone(),
        producer,
        number,
        duration,
        slow_response: cfg.slow_response,
    };

    runner.dispatch().await;

    stat.set_done();

    let captured = match ui_thread {
        Some(thread) => Some(thread.join().expect("no self join")?),
        None => None,
    };

    runner.report(&output, captured)
}

struct Runner<P> {
    stat: Arc<RunStat>,
    producer: Arc<P>,
    number: u64,
    duration: Duration,
    slow_response: Duration,
}

impl<P> Runner<P>
where
    P: JobProducer,
{
    /// Dispatches jobs until the count, the deadline or a shutdown stops the
    /// loop, then waits for in-flight jobs by claiming the whole window.
    async fn dispatch(&self) {
        for i in 0..self.number {
            if let Some(shaper) = self.stat.shaper() {
                if let Err(err) = shaper.wait(self.stat.done_notify()).await {
                    self.stat.set_last_err(err.into());
                }
            }

            let permit = self
                .stat
                .semaphore()
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore closed");

            let stat = self.stat.clone();
            let producer = self.producer.clone();
            let slow_response = self.slow_response;
            tokio::spawn(async move {
                match producer.job(i as usize).await {
                    Ok(elapsed) => stat.on_round_trip(elapsed, slow_response),
                    Err(err) => stat.on_err(err),
                }

                drop(permit);
            });

            // Checked after the launch so the final iteration is not lost.
            if self.stat.elapsed() > self.duration || self.stat.is_done() {
                break;
            }
        }

        // Claim the whole window slot by slot, re-reading the limit so a
        // concurrent adjustment cannot strand the drain.
        let mut claimed = 0;
        while claimed < self.stat.concurrency_limit() {
            let permit = self
                .stat
                .semaphore()
                .acquire()
                .await
                .expect("semaphore closed");
            permit.forget();
            claimed += 1;
        }
        self.stat.semaphore().add_permits(claimed as usize);
    }

    fn report(&self, output: &SharedOutput, captured: Option<String>) -> Result<(), Error> {
        let mut out = output.lock().unwrap();

        if let Some(frame) = captured {
            writeln!(out, "{frame}")?;
        }

        let elapsed = self.stat.elapsed();
        let count = self.stat.success_count();

        writeln!(out)?;
        writeln!(
            out,
            "Requests per second: {:.2}",
            count as f64 / elapsed.as_secs_f64()
        )?;
        writeln!(out, "Successful requests: {count}")?;

        let err_cnt = self.stat.err_count();
        if err_cnt > 0 {
            let last = self.stat.last_err_text().unwrap_or_default();
            writeln!(out, "Failed requests: {err_cnt}, last error: {last}")?;
        }

        writeln!(out, "Time spent: {:?}", round_to_ms(elapsed))?;

        if count == 0 {
            let last = self
                .stat
                .take_last_err()
                .unwrap_or_else(|| anyhow::anyhow!("no requests were made"));

            return Err(Error::AllFailed(last));
        }

        writeln!(out)?;
        writeln!(out, "Request latency percentiles:")?;
        writeln!(out, "99%: {:.2}ms", self.stat.precise().percentile(99.0))?;
        writeln!(out, "95%: {:.2}ms", self.stat.precise().percentile(95.0))?;
        writeln!(out, "90%: {:.2}ms", self.stat.precise().percentile(90.0))?;
        writeln!(out, "50%: {:.2}ms", self.stat.precise().percentile(50.0))?;
        writeln!(out)?;

        writeln!(out, "Request latency distribution in ms:")?;
        writeln!(out, "{}", self.stat.hist())?;

        writeln!(
            out,
            "Requests with latency more than {:?}: {}",
            self.slow_response,
            self.stat.slow_count()
        )?;

        for (group, values) in self.producer.metrics() {
            writeln!(out)?;
            writeln!(out, "{group}:")?;
            for (name, value) in values {
                writeln!(out, "{name}: {value:.2}")?;
            }
        }

        if let Some(s) = self.producer.summary() {
            writeln!(out)?;
            writeln!(out, "{s}")?;
        }

        Ok(())
    }
}

#[inline]
fn round_to_ms(d: Duration) -> Duration {
    Duration::from_millis((d.as_secs_f64() * 1000.0).round() as u64)
}

/// Forwards interrupt and termination signals into the exit channel.
async fn signal_fanout(tx: Sender<()>) {
    #[cfg(unix)]
    let mut term = {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(err) => {
                log::error!("failed to install SIGTERM handler: {err}");
                return;
            }
        }
    };

    loop {
        #[cfg(unix)]
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
        #[cfg(not(unix))]
        {
            _ = tokio::signal::ctrl_c().await;
        }

        if tx.send(()).await.is_err() {
            return;
        }
    }
}

/// Applies the shutdown policy: the first signal requests a graceful drain,
/// the second terminates the process.
async fn exit_policy(mut rx: Receiver<()>, stat: Arc<RunStat>, output: SharedOutput, live_ui: bool) {
    while rx.recv().await.is_some() {
        if stat.is_done() {
            std::process::exit(1);
        }

        if !live_ui {
            let mut out = output.lock().unwrap();
            _ = writeln!(out, "Stopping... Press Ctrl+C again to force exit.");
        }

        stat.set_done();
    }
}
