//! Job definitions handed to the scheduler.

use serde::{Deserialize, Serialize};

/// Unique job identifier.
pub type JobId = i64;

/// An event-triggered job: watch one contract event on the trigger chain and
/// run one action on the target chain for every confirmed occurrence.
///
/// The scheduler only interprets the trigger fields. Target fields and the
/// argument fields travel untouched to the [`ActionDispatcher`](crate::ActionDispatcher)
/// and into lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub job_id: JobId,
    pub trigger_chain_id: String,
    pub trigger_contract_address: String,
    /// Canonical event signature, e.g. `Transfer(address,address,uint256)`.
    pub trigger_event: String,
    pub target_chain_id: String,
    pub target_contract_address: String,
    pub target_function: String,
    #[serde(default)]
    pub recurring: bool,
    /// ABI of the target contract (JSON), if the dispatcher needs one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abi: Option<String>,
    /// 0 = none, 1 = static, 2 = dynamic.
    #[serde(default)]
    pub arg_type: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic_arguments_script_url: Option<String>,
}

impl JobDefinition {
    /// Create a job with the trigger fields set and the target mirroring the
    /// trigger chain. Use the `with_*` methods to fill in the rest.
    pub fn new(
        job_id: JobId,
        trigger_chain_id: impl Into<String>,
        trigger_contract_address: impl Into<String>,
        trigger_event: impl Into<String>,
    ) -> Self {
        let trigger_chain_id = trigger_chain_id.into();
        Self {
            job_id,
            target_chain_id: trigger_chain_id.clone(),
            trigger_chain_id,
            trigger_contract_address: trigger_contract_address.into(),
            trigger_event: trigger_event.into(),
            target_contract_address: String::new(),
            target_function: String::new(),
            recurring: false,
            abi: None,
            arg_type: 0,
            arguments: Vec::new(),
            dynamic_arguments_script_url: None,
        }
    }

    pub fn with_target(
        mut self,
        chain_id: impl Into<String>,
        contract_address: impl Into<String>,
        function: impl Into<String>,
    ) -> Self {
        self.target_chain_id = chain_id.into();
        self.target_contract_address = contract_address.into();
        self.target_function = function.into();
        self
    }

    pub fn recurring(mut self, recurring: bool) -> Self {
        self.recurring = recurring;
        self
    }

    pub fn with_arguments(mut self, arguments: Vec<String>) -> Self {
        self.arg_type = 1;
        self.arguments = arguments;
        self
    }
}
