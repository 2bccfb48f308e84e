use serde::Deserialize;
use serde::Serialize;

/// Why an [`crate::session`]-scoped agent run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Completed,
    MaxIterations,
    Cancelled,
    Timeout,
    Error,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            StopReason::Completed => "completed",
            StopReason::MaxIterations => "max_iterations",
            StopReason::Cancelled => "cancelled",
            StopReason::Timeout => "timeout",
            StopReason::Error => "error",
        }
    }
}

/// A single increment pushed onto an agent run's streaming channel.
///
/// The variant set matches the state machine of the agent loop (§4.8): every
/// transition between `Start`/`ModelCall`/`ToolLoop`/`Done` emits one or more
/// of these, plus backpressure notifications when the channel's consumer
/// lags behind the producer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    AgentStart {
        session_id: String,
    },
    IterationStart {
        iteration: u32,
    },
    MessageStart {
        role: crate::message::Role,
    },
    ContentBlockDelta {
        text: String,
    },
    ContentBlockStop,
    ToolExecutionStart {
        call_id: String,
        tool: String,
    },
    ToolExecutionStop {
        call_id: String,
        success: bool,
    },
    MessageStop,
    IterationStop {
        iteration: u32,
    },
    Backpressure,
    Recovered,
    AgentStop {
        reason: StopReason,
    },
}
