use std::sync::Arc;

use anyhow::{Context, Result, bail};
use daqmx_tasks::SessionOptions;
use daqmx_tasks::nidaq::{
    AnalogInputChannel, Channel, DoneEvent, EveryNSamplesEvent, SampleClockTiming, Task,
};
use tokio::sync::mpsc;
use tokio::time::{self, Duration};
use tracing::*;
use tracing_subscriber::FmtSubscriber;

/// Sample clock rate of the demo acquisition
const SAMPLE_RATE_HZ: f64 = 10_000.0;
/// Samples per channel acquired in each run
const SAMPLES_PER_RUN: u64 = 1000;
/// Every-N-samples callback interval
const EVERY_N_SAMPLES: u32 = 100;
const RUNS: usize = 3;
/// Upper bound on how long a single run may take before we give up
const RUN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
enum Notification {
    Done(DoneEvent),
    Samples(EveryNSamplesEvent),
}

/// Acquire a few finite runs on `Dev1/ai0` and report the events the driver fired.
///
/// Pass a JSON session options file as the first argument to pick the backend.
#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("setting default tracing subscriber failed")?;

    let options = match std::env::args().nth(1) {
        Some(path) => SessionOptions::from_json_file(path)?,
        None => SessionOptions::default(),
    };

    let task = Task::create_new("", Some(&options), None)?;
    task.add_ai_voltage_chan(AnalogInputChannel::new(Channel::new("Dev1/ai0")))?;
    task.cfg_samp_clk_timing(SampleClockTiming::finite(SAMPLE_RATE_HZ, SAMPLES_PER_RUN))?;

    // Callbacks fire on a driver thread, forward them to this task
    let (sender, mut receiver) = mpsc::unbounded_channel();
    let done_sender = sender.clone();
    task.register_done_event(Some(Arc::new(move |event: DoneEvent| {
        let _ = done_sender.send(Notification::Done(event));
    })))?;
    task.register_every_n_samples_acquired_into_buffer_event(
        EVERY_N_SAMPLES,
        Some(Arc::new(move |event: EveryNSamplesEvent| {
            let _ = sender.send(Notification::Samples(event));
        })),
    )?;

    info!("Acquiring {RUNS} runs on task {}", task.name()?);
    for run in 1..=RUNS {
        task.start()?;

        let mut sample_events = 0;
        let mut samples: u64 = 0;
        let done = loop {
            match time::timeout(RUN_TIMEOUT, receiver.recv()).await {
                Ok(Some(Notification::Samples(event))) => {
                    sample_events += 1;
                    samples += u64::from(event.number_of_samples);
                }
                Ok(Some(Notification::Done(done))) => break done,
                Ok(None) => bail!("event channel closed"),
                Err(_) => bail!("run {run} did not finish within {RUN_TIMEOUT:?}"),
            }
        };
        task.stop()?;

        if done.is_success() {
            info!(
                "Run {run}: {sample_events} every-N events covering {samples} samples, done at {}",
                done.received_at
            );
        } else {
            warn!("Run {run}: stopped with status {} after {sample_events} every-N events", done.status);
        }
    }

    task.close()?;
    Ok(())
}
