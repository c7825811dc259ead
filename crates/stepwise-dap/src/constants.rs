//! Protocol constants
//!
//! Centralizes the magic strings of the three protocols the relay speaks:
//! DAP towards the IDE, the line-delimited backend protocol towards the
//! Python runtime, and the inspector protocol towards Node.

/// DAP event types emitted to the IDE
pub mod events {
    /// Initialized event - adapter ready for configuration
    pub const INITIALIZED: &str = "initialized";
    /// Stopped event - entry, breakpoint, step or pause
    pub const STOPPED: &str = "stopped";
    /// Output event - program or relay output
    pub const OUTPUT: &str = "output";
    /// Terminated event - debug session ended
    pub const TERMINATED: &str = "terminated";
}

/// DAP request command names
pub mod requests {
    pub const INITIALIZE: &str = "initialize";
    pub const CONFIGURATION_DONE: &str = "configurationDone";
    pub const LAUNCH: &str = "launch";
    pub const SET_BREAKPOINTS: &str = "setBreakpoints";
    pub const THREADS: &str = "threads";
    pub const STACK_TRACE: &str = "stackTrace";
    pub const SCOPES: &str = "scopes";
    pub const VARIABLES: &str = "variables";
    pub const EVALUATE: &str = "evaluate";
    pub const CONTINUE: &str = "continue";
    pub const NEXT: &str = "next";
    pub const STEP_IN: &str = "stepIn";
    pub const STEP_OUT: &str = "stepOut";
    pub const PAUSE: &str = "pause";
    pub const DISCONNECT: &str = "disconnect";
    pub const TERMINATE: &str = "terminate";
}

/// Stopped event reasons
pub mod stop_reasons {
    /// Stopped at entry point
    pub const ENTRY: &str = "entry";
    /// Stopped at a breakpoint
    pub const BREAKPOINT: &str = "breakpoint";
    /// Stopped after a step
    pub const STEP: &str = "step";
    /// Stopped due to pause request
    pub const PAUSE: &str = "pause";
}

/// Fixed values of the single-threaded session model
pub mod defaults {
    /// The only thread the relay reports.
    pub const THREAD_ID: i64 = 1;
    /// Display name of that thread.
    pub const THREAD_NAME: &str = "main";
    /// Frame id of the single frame reported by the script and python backends.
    pub const FRAME_ID: i64 = 1;
    /// Column reported for line-granular frames.
    pub const COLUMN: i64 = 1;
}

/// Relay-generated message texts
pub mod messages {
    /// Output emitted when the script backend runs off the end of the program
    pub const PROGRAM_COMPLETED: &str = "Program completed.\n";
    /// Error message for requests received after the session ended
    pub const SESSION_TERMINATED: &str = "session terminated";
    /// Error message for requests received before `initialize`
    pub const NOT_INITIALIZED: &str = "initialize must be the first request";
    /// Prefix of the evaluate result for expressions outside the vocabulary
    pub const UNSUPPORTED_EXPRESSION: &str = "Unsupported expression";
}

/// Commands written to the Python runtime, one JSON object per line
pub mod backend_commands {
    pub const SET_BREAKPOINTS: &str = "setBreakpoints";
    pub const CONTINUE: &str = "continue";
    pub const STEP_OVER: &str = "step_over";
    pub const STEP_IN: &str = "step_in";
    pub const STEP_OUT: &str = "step_out";
    pub const VARIABLES: &str = "variables";
}

/// Inspector protocol method and event names
pub mod cdp {
    pub const RUNTIME_ENABLE: &str = "Runtime.enable";
    pub const RUNTIME_RUN_IF_WAITING: &str = "Runtime.runIfWaitingForDebugger";
    pub const RUNTIME_GET_PROPERTIES: &str = "Runtime.getProperties";
    pub const DEBUGGER_ENABLE: &str = "Debugger.enable";
    pub const DEBUGGER_SET_BREAKPOINT_BY_URL: &str = "Debugger.setBreakpointByUrl";
    pub const DEBUGGER_REMOVE_BREAKPOINT: &str = "Debugger.removeBreakpoint";
    pub const DEBUGGER_RESUME: &str = "Debugger.resume";
    pub const DEBUGGER_PAUSE: &str = "Debugger.pause";
    pub const DEBUGGER_STEP_OVER: &str = "Debugger.stepOver";
    pub const DEBUGGER_STEP_INTO: &str = "Debugger.stepInto";
    pub const DEBUGGER_STEP_OUT: &str = "Debugger.stepOut";
    pub const DEBUGGER_EVALUATE_ON_CALL_FRAME: &str = "Debugger.evaluateOnCallFrame";

    pub const EVENT_PAUSED: &str = "Debugger.paused";
    pub const EVENT_RESUMED: &str = "Debugger.resumed";
    pub const EVENT_CONSOLE_API_CALLED: &str = "Runtime.consoleAPICalled";
    pub const EVENT_EXECUTION_CONTEXT_DESTROYED: &str = "Runtime.executionContextDestroyed";

    /// Paused reason used by `--inspect-brk` for the first statement
    pub const REASON_BREAK_ON_START: &str = "Break on start";
    /// Prefix of the stderr line announcing the websocket endpoint
    pub const LISTENING_PREFIX: &str = "Debugger listening on ";
}
