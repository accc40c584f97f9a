use crate::registration_agent::RegistrationAgent;
use std::sync::Arc;

#[derive(Clone)]
pub struct WorkerState {
    pub agent: Arc<RegistrationAgent>,
    pub backend_url: String,
    pub http: reqwest::Client,
}
