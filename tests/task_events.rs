#![cfg(feature = "sim")]

mod common;

use std::sync::Arc;

use common::EventObserver;
use daqmx_tasks::backend::DaqmxDriver;
use daqmx_tasks::backend::sim::SimDriver;
use daqmx_tasks::config::{SimConfig, SimFault};
use daqmx_tasks::nidaq::{
    AnalogInputChannel, AnalogOutputChannel, Channel, DoneEvent, EventKind,
    EveryNSamplesEvent, EveryNSamplesEventType, SampleClockTiming, Signal, SignalEvent, Task,
};
use daqmx_tasks::{DaqError, DaqErrorCode};
use tokio::time::Duration;

const WAIT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(100);

fn sim_driver() -> Arc<dyn DaqmxDriver> {
    Arc::new(SimDriver::default())
}

/// One analog input channel, 1000 samples at 10 kHz
fn ai_task(driver: &Arc<dyn DaqmxDriver>) -> Task {
    let task = Task::create_new("", None, Some(driver.clone())).unwrap();
    task.add_ai_voltage_chan(AnalogInputChannel::new(Channel::new("Dev1/ai0")))
        .unwrap();
    task.cfg_samp_clk_timing(SampleClockTiming::finite(10_000.0, 1000))
        .unwrap();
    task
}

/// One analog output channel, 1000 samples at 10 kHz
fn ao_task(driver: &Arc<dyn DaqmxDriver>) -> Task {
    let task = Task::create_new("", None, Some(driver.clone())).unwrap();
    task.add_ao_voltage_chan(AnalogOutputChannel::new(Channel::new("Dev1/ao0")))
        .unwrap();
    task.cfg_samp_clk_timing(SampleClockTiming::finite(10_000.0, 1000))
        .unwrap();
    task
}

#[tokio::test]
async fn done_event_fires_once_on_success() {
    let task = ai_task(&sim_driver());
    let observer = EventObserver::<DoneEvent>::new();
    task.register_done_event(Some(observer.handler())).unwrap();

    task.start().unwrap();
    observer.wait_for_events(1, WAIT).await.unwrap();
    assert!(observer.wait_for_events(1, QUIET).await.is_err());

    let events = observer.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].task_handle, task.handle());
    assert!(events[0].is_success());
    task.stop().unwrap();
}

#[tokio::test]
async fn every_n_samples_acquired_fires_for_each_block() {
    let task = ai_task(&sim_driver());
    let observer = EventObserver::<EveryNSamplesEvent>::new();
    task.register_every_n_samples_acquired_into_buffer_event(100, Some(observer.handler()))
        .unwrap();

    task.start().unwrap();
    observer.wait_for_events(10, WAIT).await.unwrap();
    assert!(observer.wait_for_events(1, QUIET).await.is_err());
    task.stop().unwrap();

    let events = observer.events();
    assert_eq!(events.len(), 10);
    assert!(events.iter().all(|event| {
        event.event_type == EveryNSamplesEventType::AcquiredIntoBuffer
            && event.number_of_samples == 100
            && event.task_handle == task.handle()
    }));
}

#[tokio::test]
async fn every_n_samples_transferred_fires_on_output_tasks() {
    let task = ao_task(&sim_driver());
    let observer = EventObserver::<EveryNSamplesEvent>::new();
    task.register_every_n_samples_transferred_from_buffer_event(250, Some(observer.handler()))
        .unwrap();

    task.start().unwrap();
    observer.wait_for_events(4, WAIT).await.unwrap();
    task.wait_until_done(WAIT).unwrap();
    task.stop().unwrap();

    let events = observer.events();
    assert_eq!(events.len(), 4);
    assert!(events
        .iter()
        .all(|event| event.event_type == EveryNSamplesEventType::TransferredFromBuffer));
}

#[tokio::test]
async fn signal_event_fires_per_sample() {
    let task = ai_task(&sim_driver());
    let observer = EventObserver::<SignalEvent>::new();
    task.register_signal_event(Signal::SampleCompleteEvent, Some(observer.handler()))
        .unwrap();

    task.start().unwrap();
    observer.wait_for_events(1000, WAIT).await.unwrap();
    assert!(observer.wait_for_events(1, QUIET).await.is_err());
    task.stop().unwrap();

    let events = observer.events();
    assert_eq!(events.len(), 1000);
    assert!(events
        .iter()
        .all(|event| event.signal_type == Signal::SampleCompleteEvent));
}

#[tokio::test]
async fn second_registration_fails_with_kind_specific_code() {
    let task = ai_task(&sim_driver());
    let done = EventObserver::<DoneEvent>::new();
    let acquired = EventObserver::<EveryNSamplesEvent>::new();
    let transferred = EventObserver::<EveryNSamplesEvent>::new();
    let signal = EventObserver::<SignalEvent>::new();

    task.register_done_event(Some(done.handler())).unwrap();
    task.register_every_n_samples_acquired_into_buffer_event(100, Some(acquired.handler()))
        .unwrap();
    task.register_every_n_samples_transferred_from_buffer_event(100, Some(transferred.handler()))
        .unwrap();
    task.register_signal_event(Signal::SampleCompleteEvent, Some(signal.handler()))
        .unwrap();

    let failures = [
        (
            task.register_done_event(Some(done.handler())),
            DaqErrorCode::DoneEventAlreadyRegistered,
        ),
        (
            task.register_every_n_samples_acquired_into_buffer_event(
                100,
                Some(acquired.handler()),
            ),
            DaqErrorCode::EveryNSampsAcqIntoBufferEventAlreadyRegistered,
        ),
        (
            task.register_every_n_samples_transferred_from_buffer_event(
                100,
                Some(transferred.handler()),
            ),
            DaqErrorCode::EveryNSampsTransferredFromBufferEventAlreadyRegistered,
        ),
        (
            task.register_signal_event(Signal::SampleCompleteEvent, Some(signal.handler())),
            DaqErrorCode::SignalEventAlreadyRegistered,
        ),
    ];
    for (result, expected) in failures {
        let err = result.unwrap_err();
        assert!(matches!(err, DaqError::AlreadyRegistered { .. }));
        assert_eq!(err.error_code(), Some(expected));
    }

    // The first registration is still the active one
    task.start().unwrap();
    done.wait_for_events(1, WAIT).await.unwrap();
    task.stop().unwrap();
    assert_eq!(done.count(), 1);
    assert_eq!(acquired.count(), 10);
}

#[tokio::test]
async fn unregistered_done_event_is_not_delivered() {
    let task = ai_task(&sim_driver());
    let observer = EventObserver::<DoneEvent>::new();
    task.register_done_event(Some(observer.handler())).unwrap();
    task.register_done_event(None).unwrap();
    assert!(!task.is_event_registered(EventKind::Done));

    task.start().unwrap();
    task.wait_until_done(WAIT).unwrap();
    assert!(observer.wait_for_events(1, QUIET).await.is_err());
    task.stop().unwrap();
    assert_eq!(observer.count(), 0);
}

#[test]
fn unregistering_nothing_is_a_no_op() {
    let task = ai_task(&sim_driver());

    task.register_done_event(None).unwrap();
    task.register_every_n_samples_acquired_into_buffer_event(100, None)
        .unwrap();
    task.register_every_n_samples_transferred_from_buffer_event(100, None)
        .unwrap();
    task.register_signal_event(Signal::SampleClock, None).unwrap();
}

#[tokio::test]
async fn register_unregister_cycles_leave_nothing_behind() {
    let task = ai_task(&sim_driver());
    let done = EventObserver::<DoneEvent>::new();
    let acquired = EventObserver::<EveryNSamplesEvent>::new();
    let signal = EventObserver::<SignalEvent>::new();

    for _ in 0..10 {
        task.register_done_event(Some(done.handler())).unwrap();
        task.register_every_n_samples_acquired_into_buffer_event(100, Some(acquired.handler()))
            .unwrap();
        task.register_signal_event(Signal::SampleClock, Some(signal.handler()))
            .unwrap();

        task.register_done_event(None).unwrap();
        task.register_every_n_samples_acquired_into_buffer_event(100, None)
            .unwrap();
        task.register_signal_event(Signal::SampleClock, None).unwrap();
    }

    for kind in [
        EventKind::Done,
        EventKind::EveryNSamplesAcquiredIntoBuffer,
        EventKind::Signal(Signal::SampleClock),
    ] {
        assert!(!task.is_event_registered(kind), "{kind} still registered");
    }

    task.start().unwrap();
    task.wait_until_done(WAIT).unwrap();
    task.stop().unwrap();
    assert_eq!(done.count() + acquired.count() + signal.count(), 0);
}

#[tokio::test]
async fn transferred_register_unregister_cycles_on_an_output_task() {
    let task = ao_task(&sim_driver());
    let transferred = EventObserver::<EveryNSamplesEvent>::new();

    for _ in 0..10 {
        task.register_every_n_samples_transferred_from_buffer_event(
            100,
            Some(transferred.handler()),
        )
        .unwrap();
        task.register_every_n_samples_transferred_from_buffer_event(100, None)
            .unwrap();
    }
    assert!(!task.is_event_registered(EventKind::EveryNSamplesTransferredFromBuffer));

    task.start().unwrap();
    task.wait_until_done(WAIT).unwrap();
    assert!(transferred.wait_for_events(1, QUIET).await.is_err());
    task.stop().unwrap();
    assert_eq!(transferred.count(), 0);
}

#[tokio::test]
async fn second_transferred_registration_fails_on_an_output_task() {
    let task = ao_task(&sim_driver());
    let first = EventObserver::<EveryNSamplesEvent>::new();
    let second = EventObserver::<EveryNSamplesEvent>::new();
    task.register_every_n_samples_transferred_from_buffer_event(100, Some(first.handler()))
        .unwrap();

    let err = task
        .register_every_n_samples_transferred_from_buffer_event(100, Some(second.handler()))
        .unwrap_err();
    assert_eq!(
        err.error_code(),
        Some(DaqErrorCode::EveryNSampsTransferredFromBufferEventAlreadyRegistered)
    );

    task.start().unwrap();
    first.wait_for_events(10, WAIT).await.unwrap();
    assert!(first.wait_for_events(1, QUIET).await.is_err());
    task.stop().unwrap();
    assert_eq!(first.count(), 10);
    assert_eq!(second.count(), 0);
}

#[tokio::test]
async fn repeated_runs_fire_events_every_run() {
    let task = ai_task(&sim_driver());
    let done = EventObserver::<DoneEvent>::new();
    let acquired = EventObserver::<EveryNSamplesEvent>::new();
    task.register_done_event(Some(done.handler())).unwrap();
    task.register_every_n_samples_acquired_into_buffer_event(100, Some(acquired.handler()))
        .unwrap();

    for _ in 0..3 {
        task.start().unwrap();
        done.wait_for_events(1, WAIT).await.unwrap();
        acquired.wait_for_events(10, WAIT).await.unwrap();
        task.stop().unwrap();
    }

    assert_eq!(done.count(), 3);
    assert_eq!(acquired.count(), 30);
    assert!(done.events().iter().all(DoneEvent::is_success));
}

#[tokio::test]
async fn driver_fault_is_reported_through_done_status() {
    let driver: Arc<dyn DaqmxDriver> = Arc::new(SimDriver::new(SimConfig {
        fault: Some(SimFault {
            after_samples: 500,
            status: -200279,
        }),
        ..SimConfig::default()
    }));
    let task = ai_task(&driver);
    let done = EventObserver::<DoneEvent>::new();
    let acquired = EventObserver::<EveryNSamplesEvent>::new();
    task.register_done_event(Some(done.handler())).unwrap();
    task.register_every_n_samples_acquired_into_buffer_event(100, Some(acquired.handler()))
        .unwrap();

    task.start().unwrap();
    done.wait_for_events(1, WAIT).await.unwrap();
    let err = task.wait_until_done(WAIT).unwrap_err();
    task.stop().unwrap();

    assert_eq!(done.events()[0].status, -200279);
    assert_eq!(err.error_code(), Some(DaqErrorCode::Other(-200279)));
    assert_eq!(acquired.count(), 5);
}

#[tokio::test]
async fn unregistered_every_n_samples_is_not_delivered() {
    // One block every 50 ms
    let driver: Arc<dyn DaqmxDriver> = Arc::new(SimDriver::new(SimConfig {
        time_scale: 5.0,
        ..SimConfig::default()
    }));
    let task = ai_task(&driver);
    let acquired = EventObserver::<EveryNSamplesEvent>::new();
    task.register_every_n_samples_acquired_into_buffer_event(100, Some(acquired.handler()))
        .unwrap();

    task.start().unwrap();
    acquired.wait_for_events(1, WAIT).await.unwrap();
    task.register_every_n_samples_acquired_into_buffer_event(100, None)
        .unwrap();
    // Let a callback that was already running finish
    std::thread::sleep(Duration::from_millis(10));
    let delivered = acquired.count();
    task.wait_until_done(WAIT).unwrap();
    task.stop().unwrap();

    assert_eq!(acquired.count(), delivered);
    assert!(delivered < 10);
}

#[test]
fn rejects_invalid_arguments_before_the_driver() {
    let task = ai_task(&sim_driver());
    let noop: Arc<dyn Fn(EveryNSamplesEvent) + Send + Sync> =
        Arc::new(|_: EveryNSamplesEvent| {});

    assert!(matches!(
        task.register_every_n_samples_acquired_into_buffer_event(0, Some(noop)),
        Err(DaqError::InvalidArgument(_))
    ));
    assert!(!task.is_event_registered(EventKind::EveryNSamplesAcquiredIntoBuffer));
    assert!(matches!(
        task.cfg_samp_clk_timing(SampleClockTiming::continuous(-1.0, 100)),
        Err(DaqError::InvalidArgument(_))
    ));
}

#[test]
fn start_errors_come_from_the_driver() {
    let driver = sim_driver();
    let empty = Task::create_new("", None, Some(driver.clone())).unwrap();
    assert_eq!(
        empty.start().unwrap_err().error_code(),
        Some(DaqErrorCode::CanNotPerformOpWhenNoChansInTask)
    );

    let task = ai_task(&driver);
    task.cfg_samp_clk_timing(SampleClockTiming::continuous(1000.0, 100))
        .unwrap();
    task.start().unwrap();
    assert_eq!(
        task.start().unwrap_err().error_code(),
        Some(DaqErrorCode::CannotPerformOpWhileTaskRunning)
    );
    assert_eq!(
        task.wait_until_done(Duration::from_millis(10))
            .unwrap_err()
            .error_code(),
        Some(DaqErrorCode::WaitUntilDoneDoesNotIndicateDone)
    );
    task.stop().unwrap();
    assert!(task.is_done().unwrap());
}

#[test]
fn close_clears_the_native_task() {
    let driver = sim_driver();
    let task = ai_task(&driver);
    let handle = task.handle();
    task.register_done_event(Some(Arc::new(|_: DoneEvent| {})))
        .unwrap();

    task.close().unwrap();
    assert!(matches!(
        driver.task_name(handle),
        Err(DaqError::InvalidHandle { .. })
    ));
}
