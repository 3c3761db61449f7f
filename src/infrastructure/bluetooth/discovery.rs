//! Discovery Coordinator
//!
//! Turns the stack's callback-driven inquiry and service search into
//! blocking calls. Every search gets its own completion signal; the registry
//! and all search states sit behind a single lock shared with the stack's
//! event-delivery threads.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::domain::models::{
    AppEvent, BluetoothAddress, DeviceIdentity, EndpointDescriptor, InquiryStatus, SearchStatus,
    ServiceRecord, Uuid,
};
use crate::domain::registry::Registry;
use crate::domain::settings::DiscoverySettings;
use crate::error::BluetoothError;
use crate::infrastructure::bluetooth::stack::{AccessCode, DiscoveryAgent, TransactionId};

/// Attribute fetched for every matching record (protocol descriptor list).
pub const DEFAULT_ATTRIBUTE_ID: u16 = 0x0003;

/// Service class searched for by default (RFCOMM).
pub const DEFAULT_SERVICE_UUID: u32 = 0x0003;

/// Configuration for discovery behavior
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Attribute IDs requested during endpoint search
    pub attribute_ids: Vec<u16>,
    /// Service class UUIDs a record must carry to be reported
    pub service_uuids: Vec<Uuid>,
    /// Upper bound on each blocking call; `None` waits forever
    pub timeout: Option<Duration>,
    /// Turn declined inquiries and abnormal terminal codes into errors
    pub strict: bool,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            attribute_ids: vec![DEFAULT_ATTRIBUTE_ID],
            service_uuids: vec![Uuid::from_short(DEFAULT_SERVICE_UUID)],
            timeout: None,
            strict: false,
        }
    }
}

impl TryFrom<&DiscoverySettings> for DiscoveryOptions {
    type Error = BluetoothError;

    fn try_from(settings: &DiscoverySettings) -> Result<Self, Self::Error> {
        let service_uuids = settings
            .search_uuids
            .iter()
            .map(|u| u.parse())
            .collect::<Result<Vec<Uuid>, _>>()?;
        Ok(Self {
            attribute_ids: settings.attribute_ids.clone(),
            service_uuids,
            timeout: settings.timeout_ms.map(Duration::from_millis),
            strict: settings.strict,
        })
    }
}

/// Result of one blocking search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchOutcome<S> {
    /// Devices an inquiry newly added to the registry, or endpoints now
    /// recorded for the searched device.
    pub count: usize,
    /// Terminal code, `None` when the stack declined to start the search.
    pub status: Option<S>,
}

impl<S> SearchOutcome<S> {
    pub fn started(&self) -> bool {
        self.status.is_some()
    }
}

type SearchId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SearchKind {
    Inquiry,
    Endpoints(BluetoothAddress),
}

#[derive(Debug, Clone, Copy)]
enum Terminal {
    Inquiry(InquiryStatus),
    Endpoints(SearchStatus),
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Pending,
    Completed(Terminal),
    Interrupted,
}

#[derive(Debug)]
struct Search {
    kind: SearchKind,
    phase: Phase,
    transaction: Option<TransactionId>,
    /// Devices this inquiry added to the registry.
    added: usize,
    signal: Arc<Condvar>,
}

#[derive(Default)]
struct State {
    registry: Registry,
    searches: HashMap<SearchId, Search>,
}

struct Shared {
    state: Mutex<State>,
    events: Option<mpsc::UnboundedSender<AppEvent>>,
}

impl Shared {
    fn lock(&self) -> Result<MutexGuard<'_, State>, BluetoothError> {
        self.state.lock().map_err(|_| BluetoothError::InterruptedWait)
    }

    /// Lock even if a panicking thread poisoned it, so waiters still get
    /// woken up.
    fn lock_recovering(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: AppEvent) {
        if let Some(sender) = &self.events {
            let _ = sender.send(event);
        }
    }
}

/// Receiver for one search's events, handed to the stack.
///
/// Cheap to clone. Events arriving after the search has completed, timed
/// out or been abandoned are ignored.
#[derive(Clone)]
pub struct EventSink {
    inner: Arc<SinkInner>,
}

struct SinkInner {
    shared: Arc<Shared>,
    search: SearchId,
}

impl EventSink {
    /// A device answered the inquiry.
    pub fn device_discovered(&self, device: DeviceIdentity) {
        let recorded = {
            let mut guard = self.inner.shared.lock_recovering();
            let state = &mut *guard;
            match state.searches.get_mut(&self.inner.search) {
                Some(search)
                    if matches!(search.phase, Phase::Pending)
                        && search.kind == SearchKind::Inquiry =>
                {
                    if state.registry.record_device(device.clone()) {
                        search.added += 1;
                    }
                    true
                }
                _ => false,
            }
        };

        if recorded {
            debug!("{} found", device);
            self.inner.shared.emit(AppEvent::DeviceFound(device));
        } else {
            debug!("Ignoring late device event for {}", device.address());
        }
    }

    /// The inquiry finished; releases the blocked caller.
    pub fn inquiry_completed(&self, status: InquiryStatus) {
        self.complete(Terminal::Inquiry(status));
    }

    /// One or more service records matched the search.
    pub fn services_discovered(&self, transaction: TransactionId, records: &[ServiceRecord]) {
        let found = {
            let mut guard = self.inner.shared.lock_recovering();
            let state = &mut *guard;
            let searched = match state.searches.get(&self.inner.search) {
                Some(Search {
                    kind: SearchKind::Endpoints(address),
                    phase: Phase::Pending,
                    ..
                }) => *address,
                _ => {
                    debug!("Ignoring late service records for transaction {}", transaction);
                    return;
                }
            };

            let mut found = Vec::new();
            for record in records {
                let Some(url) = record.connection_url() else {
                    debug!("Skipping record without a connection url");
                    continue;
                };
                if record.host.address() != searched {
                    debug!(
                        "Record for {} delivered to search of {}",
                        record.host.address(),
                        searched
                    );
                }
                let endpoint = EndpointDescriptor::new(url, record.host.address());
                if state.registry.record_endpoint(&record.host, endpoint.clone()) {
                    found.push(endpoint);
                }
            }
            found
        };

        for endpoint in found {
            debug!("Service {} found", endpoint.url);
            self.inner.shared.emit(AppEvent::EndpointFound(endpoint));
        }
    }

    /// The service search finished; releases the blocked caller.
    pub fn service_search_completed(&self, transaction: TransactionId, status: SearchStatus) {
        debug!("Transaction {} finished: {}", transaction, status);
        self.complete(Terminal::Endpoints(status));
    }

    /// Move the search from pending to completed. Only the first matching
    /// terminal event counts. The progress event goes out before the waiter
    /// is woken.
    fn complete(&self, terminal: Terminal) -> bool {
        let mut state = self.inner.shared.lock_recovering();
        let Some(search) = state.searches.get_mut(&self.inner.search) else {
            debug!("Terminal event for a finished search ignored");
            return false;
        };
        let event = match (search.kind, terminal) {
            (SearchKind::Inquiry, Terminal::Inquiry(status)) => AppEvent::InquiryFinished(status),
            (SearchKind::Endpoints(device), Terminal::Endpoints(status)) => {
                AppEvent::SearchFinished { device, status }
            }
            _ => {
                debug!("Mismatched terminal event ignored");
                return false;
            }
        };
        if !matches!(search.phase, Phase::Pending) {
            debug!("Duplicate terminal event ignored");
            return false;
        }

        log_terminal(terminal);
        search.phase = Phase::Completed(terminal);
        self.inner.shared.emit(event);
        search.signal.notify_all();
        true
    }
}

impl Drop for SinkInner {
    fn drop(&mut self) {
        let mut state = self.shared.lock_recovering();
        if let Some(search) = state.searches.get_mut(&self.search) {
            if matches!(search.phase, Phase::Pending) {
                warn!("Stack released search {} without a terminal event", self.search);
                search.phase = Phase::Interrupted;
                search.signal.notify_all();
            }
        }
    }
}

fn log_terminal(terminal: Terminal) {
    match terminal {
        Terminal::Inquiry(status @ (InquiryStatus::Completed | InquiryStatus::Terminated)) => {
            info!("{}", status)
        }
        Terminal::Inquiry(status) => warn!("{}", status),
        Terminal::Endpoints(
            status @ (SearchStatus::Completed | SearchStatus::Terminated | SearchStatus::NoRecords),
        ) => info!("{}", status),
        Terminal::Endpoints(status) => warn!("{}", status),
    }
}

/// Blocking front end over a [`DiscoveryAgent`].
pub struct DiscoveryCoordinator<A: DiscoveryAgent> {
    agent: A,
    options: DiscoveryOptions,
    shared: Arc<Shared>,
    next_search: AtomicU64,
}

impl<A: DiscoveryAgent> DiscoveryCoordinator<A> {
    pub fn new(agent: A, options: DiscoveryOptions) -> Self {
        Self::build(agent, options, None)
    }

    /// Like [`new`](Self::new), additionally forwarding every discovery
    /// event to `events`.
    pub fn with_events(
        agent: A,
        options: DiscoveryOptions,
        events: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        Self::build(agent, options, Some(events))
    }

    fn build(
        agent: A,
        options: DiscoveryOptions,
        events: Option<mpsc::UnboundedSender<AppEvent>>,
    ) -> Self {
        Self {
            agent,
            options,
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                events,
            }),
            next_search: AtomicU64::new(1),
        }
    }

    pub fn agent(&self) -> &A {
        &self.agent
    }

    pub fn options(&self) -> &DiscoveryOptions {
        &self.options
    }

    /// Run a general inquiry and block until it finishes.
    ///
    /// Returns the number of distinct devices this inquiry added to the
    /// registry; devices already known from an earlier inquiry are not
    /// counted again. If the stack declines to start the inquiry the call
    /// returns at once with a count of zero and no status (an error in
    /// strict mode).
    pub fn discover_devices(&self) -> Result<SearchOutcome<InquiryStatus>, BluetoothError> {
        info!("Searching for devices...");
        let (id, signal) = self.begin(SearchKind::Inquiry)?;

        let started = match self.agent.start_inquiry(AccessCode::General, self.sink(id)) {
            Ok(started) => started,
            Err(e) => {
                self.abandon(id);
                return Err(e);
            }
        };

        if !started {
            self.abandon(id);
            warn!("Inquiry could not be started");
            if self.options.strict {
                return Err(BluetoothError::InquiryFailedToStart);
            }
            return Ok(SearchOutcome {
                count: 0,
                status: None,
            });
        }

        let (terminal, search) = self.wait(id, &signal)?;
        let Terminal::Inquiry(status) = terminal else {
            return Err(BluetoothError::InterruptedWait);
        };

        let count = search.added;
        info!("{} devices were found", count);
        if self.options.strict && !status.is_normal() {
            return Err(BluetoothError::SearchTerminatedAbnormally(status.to_string()));
        }
        Ok(SearchOutcome {
            count,
            status: Some(status),
        })
    }

    /// Search `device` for endpoints and block until the search finishes.
    ///
    /// Returns the number of endpoints recorded for `device` afterwards.
    /// Endpoints are only recorded for devices a previous inquiry found.
    pub fn discover_endpoints(
        &self,
        device: &DeviceIdentity,
    ) -> Result<SearchOutcome<SearchStatus>, BluetoothError> {
        info!(
            "Searching what services are available for device {}...",
            device.display_name()
        );
        let (id, signal) = self.begin(SearchKind::Endpoints(device.address()))?;

        let transaction = match self.agent.search_services(
            &self.options.attribute_ids,
            &self.options.service_uuids,
            device,
            self.sink(id),
        ) {
            Ok(transaction) => transaction,
            Err(e) => {
                self.abandon(id);
                return Err(e);
            }
        };

        if let Some(search) = self.shared.lock()?.searches.get_mut(&id) {
            search.transaction = Some(transaction);
        }

        let (terminal, _) = self.wait(id, &signal)?;
        let Terminal::Endpoints(status) = terminal else {
            return Err(BluetoothError::InterruptedWait);
        };

        let count = self.shared.lock()?.registry.endpoint_count(device);
        info!("{} services found", count);
        if self.options.strict && !status.is_normal() {
            return Err(BluetoothError::SearchTerminatedAbnormally(status.to_string()));
        }
        Ok(SearchOutcome {
            count,
            status: Some(status),
        })
    }

    /// Search every known device in discovery order.
    pub fn discover_all_endpoints(
        &self,
    ) -> Result<Vec<(DeviceIdentity, SearchOutcome<SearchStatus>)>, BluetoothError> {
        self.devices()
            .into_iter()
            .map(|device| {
                let outcome = self.discover_endpoints(&device)?;
                Ok((device, outcome))
            })
            .collect()
    }

    /// Ask the stack to stop a running inquiry. The blocked caller returns
    /// with a terminated status.
    pub fn cancel_inquiry(&self) -> bool {
        self.agent.cancel_inquiry()
    }

    /// Ask the stack to stop the running endpoint search on `device`.
    pub fn cancel_endpoint_search(&self, device: &DeviceIdentity) -> bool {
        let transactions: Vec<TransactionId> = {
            let state = self.shared.lock_recovering();
            state
                .searches
                .values()
                .filter(|s| {
                    s.kind == SearchKind::Endpoints(device.address())
                        && matches!(s.phase, Phase::Pending)
                })
                .filter_map(|s| s.transaction)
                .collect()
        };
        transactions
            .into_iter()
            .fold(false, |any, tx| self.agent.cancel_service_search(tx) || any)
    }

    /// Devices found so far, in discovery order.
    pub fn devices(&self) -> Vec<DeviceIdentity> {
        self.shared.lock_recovering().registry.list_devices()
    }

    /// Endpoints recorded for `device`; empty if it is unknown.
    pub fn endpoints(&self, device: &DeviceIdentity) -> Vec<EndpointDescriptor> {
        self.shared.lock_recovering().registry.list_endpoints(device)
    }

    /// Friendly name of `device`, falling back to its address.
    pub fn display_name(&self, device: &DeviceIdentity) -> String {
        if let Some(name) = device.name().filter(|n| !n.is_empty()) {
            return name.to_string();
        }
        match self.agent.friendly_name(&device.address()) {
            Ok(name) if !name.is_empty() => name,
            Ok(_) => device.address().to_string(),
            Err(e) => {
                debug!("Unable to get friendly name: {}", e);
                device.address().to_string()
            }
        }
    }

    fn begin(&self, kind: SearchKind) -> Result<(SearchId, Arc<Condvar>), BluetoothError> {
        let id = self.next_search.fetch_add(1, Ordering::Relaxed);
        let signal = Arc::new(Condvar::new());
        self.shared.lock()?.searches.insert(
            id,
            Search {
                kind,
                phase: Phase::Pending,
                transaction: None,
                added: 0,
                signal: Arc::clone(&signal),
            },
        );
        Ok((id, signal))
    }

    fn sink(&self, search: SearchId) -> EventSink {
        EventSink {
            inner: Arc::new(SinkInner {
                shared: Arc::clone(&self.shared),
                search,
            }),
        }
    }

    fn abandon(&self, id: SearchId) {
        self.shared.lock_recovering().searches.remove(&id);
    }

    /// Block until search `id` leaves the pending phase, then retire it.
    fn wait(&self, id: SearchId, signal: &Condvar) -> Result<(Terminal, Search), BluetoothError> {
        let pending = move |state: &mut State| {
            matches!(
                state.searches.get(&id).map(|s| s.phase),
                Some(Phase::Pending)
            )
        };

        let guard = self.shared.lock()?;
        let mut guard = match self.options.timeout {
            None => signal
                .wait_while(guard, pending)
                .map_err(|_| BluetoothError::InterruptedWait)?,
            Some(limit) => {
                let (mut guard, result) = signal
                    .wait_timeout_while(guard, limit, pending)
                    .map_err(|_| BluetoothError::InterruptedWait)?;
                if result.timed_out() && pending(&mut *guard) {
                    let search = guard.searches.remove(&id);
                    drop(guard);
                    warn!("Discovery timed out after {:?}", limit);
                    if let Some(search) = search {
                        self.cancel_timed_out(&search);
                    }
                    return Err(BluetoothError::DiscoveryTimedOut(limit));
                }
                guard
            }
        };

        let search = guard
            .searches
            .remove(&id)
            .ok_or(BluetoothError::InterruptedWait)?;
        let phase = search.phase;
        match phase {
            Phase::Completed(terminal) => Ok((terminal, search)),
            Phase::Pending | Phase::Interrupted => Err(BluetoothError::InterruptedWait),
        }
    }

    fn cancel_timed_out(&self, search: &Search) {
        let cancelled = match (search.kind, search.transaction) {
            (SearchKind::Inquiry, _) => self.agent.cancel_inquiry(),
            (SearchKind::Endpoints(_), Some(tx)) => self.agent.cancel_service_search(tx),
            (SearchKind::Endpoints(_), None) => false,
        };
        debug!("Cancellation after timeout accepted: {}", cancelled);
    }
}
