use cs_core::metrics;
use std::collections::HashMap;

use crate::directory::DirectoryError;
use crate::domain::{ConnectionState, PublicKey, RelayAddress};
use crate::ports::Metrics;

/// [`Metrics`] backed by the process-wide Prometheus registry.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusMetrics;

impl Metrics for PrometheusMetrics {
    fn report_number_of_public_key_downloaders(&self, count: usize) {
        metrics::set_public_key_downloaders(count);
    }

    fn report_number_of_public_key_downloader_relays(&self, public_key: &PublicKey, count: usize) {
        metrics::set_public_key_downloader_relays(&public_key.hex(), count);
    }

    fn remove_public_key_downloader(&self, public_key: &PublicKey) {
        metrics::remove_public_key_downloader_relays(&public_key.hex());
    }

    fn report_relay_connection_states(&self, states: &HashMap<RelayAddress, ConnectionState>) {
        let all_states = ConnectionState::ALL.map(|state| state.as_str());
        for (relay, state) in states {
            metrics::set_relay_connection_state(relay.as_str(), state.as_str(), &all_states);
        }
    }

    fn report_directory_lookup(&self, directory: &RelayAddress, result: Result<(), &DirectoryError>) {
        let label = match result {
            Ok(()) => metrics::DIRECTORY_LOOKUP_RESULT_SUCCESS,
            Err(DirectoryError::NotFound) => metrics::DIRECTORY_LOOKUP_RESULT_NOT_FOUND,
            Err(DirectoryError::Lookup(_)) => metrics::DIRECTORY_LOOKUP_RESULT_ERROR,
        };
        metrics::inc_directory_lookup(directory.as_str(), label);
    }

    fn report_received_event(&self) {
        metrics::inc_received_events();
    }
}
