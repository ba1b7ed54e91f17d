//! Raw declarations of the NIDAQmx C entry points this crate calls.
#![allow(non_snake_case)]

use libc::{c_char, c_void};

pub type RawTaskHandle = *mut c_void;
pub type Int32 = i32;
pub type UInt32 = u32;
pub type UInt64 = u64;
pub type Float64 = f64;
pub type Bool32 = u32;

pub type DoneEventCallbackPtr =
    Option<unsafe extern "C" fn(RawTaskHandle, Int32, *mut c_void) -> Int32>;
pub type EveryNSamplesEventCallbackPtr =
    Option<unsafe extern "C" fn(RawTaskHandle, Int32, UInt32, *mut c_void) -> Int32>;
pub type SignalEventCallbackPtr =
    Option<unsafe extern "C" fn(RawTaskHandle, Int32, *mut c_void) -> Int32>;

#[link(name = "NIDAQmx")]
unsafe extern "C" {
    pub fn DAQmxGetExtendedErrorInfo(errorString: *mut c_char, bufferSize: UInt32) -> Int32;

    pub fn DAQmxCreateTask(taskName: *const c_char, taskHandle: *mut RawTaskHandle) -> Int32;
    pub fn DAQmxLoadTask(taskName: *const c_char, taskHandle: *mut RawTaskHandle) -> Int32;
    pub fn DAQmxClearTask(taskHandle: RawTaskHandle) -> Int32;
    pub fn DAQmxGetTaskName(taskHandle: RawTaskHandle, data: *mut c_char, bufferSize: UInt32)
    -> Int32;

    pub fn DAQmxStartTask(taskHandle: RawTaskHandle) -> Int32;
    pub fn DAQmxStopTask(taskHandle: RawTaskHandle) -> Int32;
    pub fn DAQmxWaitUntilTaskDone(taskHandle: RawTaskHandle, timeToWait: Float64) -> Int32;
    pub fn DAQmxIsTaskDone(taskHandle: RawTaskHandle, isTaskDone: *mut Bool32) -> Int32;

    pub fn DAQmxCreateAIVoltageChan(
        taskHandle: RawTaskHandle,
        physicalChannel: *const c_char,
        nameToAssignToChannel: *const c_char,
        terminalConfig: Int32,
        minVal: Float64,
        maxVal: Float64,
        units: Int32,
        customScaleName: *const c_char,
    ) -> Int32;
    pub fn DAQmxCreateAOVoltageChan(
        taskHandle: RawTaskHandle,
        physicalChannel: *const c_char,
        nameToAssignToChannel: *const c_char,
        minVal: Float64,
        maxVal: Float64,
        units: Int32,
        customScaleName: *const c_char,
    ) -> Int32;
    pub fn DAQmxCfgSampClkTiming(
        taskHandle: RawTaskHandle,
        source: *const c_char,
        rate: Float64,
        activeEdge: Int32,
        sampleMode: Int32,
        sampsPerChan: UInt64,
    ) -> Int32;

    pub fn DAQmxRegisterDoneEvent(
        task: RawTaskHandle,
        options: UInt32,
        callbackFunction: DoneEventCallbackPtr,
        callbackData: *mut c_void,
    ) -> Int32;
    pub fn DAQmxRegisterEveryNSamplesEvent(
        task: RawTaskHandle,
        everyNsamplesEventType: Int32,
        nSamples: UInt32,
        options: UInt32,
        callbackFunction: EveryNSamplesEventCallbackPtr,
        callbackData: *mut c_void,
    ) -> Int32;
    pub fn DAQmxRegisterSignalEvent(
        task: RawTaskHandle,
        signalID: Int32,
        options: UInt32,
        callbackFunction: SignalEventCallbackPtr,
        callbackData: *mut c_void,
    ) -> Int32;
}
