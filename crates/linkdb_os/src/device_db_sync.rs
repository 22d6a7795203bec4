#![forbid(unsafe_code)]

use std::collections::VecDeque;
use std::env;
use std::fmt;

use linkdb_kernel_contracts::db_write::DbOpReport;
use linkdb_kernel_contracts::device_addr::DeviceAddr;
use linkdb_kernel_contracts::link_entry::{DbFlags, GroupNumber, LinkData, LinkEntry};
use linkdb_kernel_contracts::ContractViolation;
use linkdb_storage::device_db::DeviceDb;
use tracing::{debug, error, info, warn};

use crate::db_modify::{DbModifyExchange, DbModifyStep};
use crate::transport::{DbWriteTransport, WriteOutcome};

pub mod reason_codes {
    use linkdb_kernel_contracts::ReasonCodeId;

    // Device all-link database sync namespace.
    pub const LINKDB_OK_ADD: ReasonCodeId = ReasonCodeId(0x4C44_0001);
    pub const LINKDB_OK_ADD_EXISTS: ReasonCodeId = ReasonCodeId(0x4C44_0002);
    pub const LINKDB_OK_DELETE: ReasonCodeId = ReasonCodeId(0x4C44_0003);
    pub const LINKDB_FAIL_TRANSPORT: ReasonCodeId = ReasonCodeId(0x4C44_00F1);
    pub const LINKDB_FAIL_STRUCTURE: ReasonCodeId = ReasonCodeId(0x4C44_00F2);
    pub const LINKDB_FAIL_INVALID: ReasonCodeId = ReasonCodeId(0x4C44_00F3);
    pub const LINKDB_FAIL_BUSY: ReasonCodeId = ReasonCodeId(0x4C44_00F4);
}

pub const LINKDB_MAX_PENDING_OPS_ENV: &str = "LINKDB_MAX_PENDING_OPS";

const MSG_ENTRY_EXISTS: &str = "Entry already exists";
const MSG_UPDATE_COMPLETE: &str = "Device database update complete";

fn update_failed(detail: impl fmt::Display) -> String {
    format!("Device database update failed: {detail}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceDbSyncConfig {
    /// Requests allowed to wait behind the one in flight.
    pub max_pending_ops: u16,
}

impl DeviceDbSyncConfig {
    pub fn mvp_v1() -> Self {
        Self {
            max_pending_ops: 256,
        }
    }

    pub fn from_env() -> Self {
        let max_pending_ops = env::var(LINKDB_MAX_PENDING_OPS_ENV)
            .ok()
            .and_then(|v| v.trim().parse::<u16>().ok())
            .filter(|v| (1..=4096).contains(v))
            .unwrap_or(Self::mvp_v1().max_pending_ops);
        Self { max_pending_ops }
    }
}

impl Default for DeviceDbSyncConfig {
    fn default() -> Self {
        Self::mvp_v1()
    }
}

/// Completion callback. Fires exactly once per accepted or refused request.
///
/// Callbacks run inside the runtime call that finished the request, while the
/// runtime is still mutably borrowed. A callback must not reach back into the
/// same runtime (for example through an `Rc<RefCell<_>>` handle); record the
/// report and issue follow-on requests after the call returns.
pub type OnDone = Box<dyn FnOnce(DbOpReport)>;

/// A link to create on the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbAddRequest {
    pub addr: DeviceAddr,
    pub group: GroupNumber,
    pub is_controller: bool,
    pub data: LinkData,
}

impl DbAddRequest {
    /// Missing link data is sent as zeros.
    pub fn v1(
        addr: DeviceAddr,
        group: GroupNumber,
        is_controller: bool,
        data: Option<LinkData>,
    ) -> Self {
        Self {
            addr,
            group,
            is_controller,
            data: data.unwrap_or_default(),
        }
    }

    /// Builds a request from the loose forms callers usually hold: address
    /// text such as "44.85.11" and a numeric group string.
    pub fn parse(
        addr: &str,
        group: &str,
        is_controller: bool,
        data: Option<&[u8]>,
    ) -> Result<Self, ContractViolation> {
        let data = data.map(LinkData::from_slice).transpose()?;
        Ok(Self::v1(
            DeviceAddr::parse(addr)?,
            GroupNumber::parse(group)?,
            is_controller,
            data,
        ))
    }
}

enum DbCommand {
    Add {
        request: DbAddRequest,
        on_done: Option<OnDone>,
    },
    Delete {
        entry: LinkEntry,
        on_done: Option<OnDone>,
    },
}

impl DbCommand {
    fn label(&self) -> &'static str {
        match self {
            Self::Add { .. } => "add",
            Self::Delete { .. } => "delete",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DbOpKind {
    Add,
    Delete,
}

struct InFlightOp {
    kind: DbOpKind,
    exchange: DbModifyExchange,
    on_done: Option<OnDone>,
}

type Completion = (Option<OnDone>, DbOpReport);

/// Drives add/delete requests against one device's link table and keeps the
/// local mirror in step with what the device acknowledged.
///
/// At most one write exchange is outstanding at a time. Requests that arrive
/// while one is in flight wait in a FIFO and start, in order, as soon as the
/// previous exchange finishes. The mirror is only changed by acknowledged
/// writes.
pub struct DeviceDbSyncRuntime {
    config: DeviceDbSyncConfig,
    db: DeviceDb,
    in_flight: Option<InFlightOp>,
    pending: VecDeque<DbCommand>,
}

impl fmt::Debug for DeviceDbSyncRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceDbSyncRuntime")
            .field("config", &self.config)
            .field("device", &self.db.addr())
            .field("busy", &self.is_busy())
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl DeviceDbSyncRuntime {
    pub fn new(config: DeviceDbSyncConfig, db: DeviceDb) -> Self {
        Self {
            config,
            db,
            in_flight: None,
            pending: VecDeque::new(),
        }
    }

    pub fn db(&self) -> &DeviceDb {
        &self.db
    }

    /// Local-only access, e.g. for loading a downloaded table. Must not be
    /// used to rewrite slots while a write is in flight.
    pub fn db_mut(&mut self) -> &mut DeviceDb {
        &mut self.db
    }

    pub fn into_db(self) -> DeviceDb {
        self.db
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Adds a link to the device. An identical (peer, group, role) link that
    /// already exists completes at once as a success and nothing is sent.
    pub fn add_on_device<T: DbWriteTransport + ?Sized>(
        &mut self,
        transport: &mut T,
        request: DbAddRequest,
        on_done: Option<OnDone>,
    ) {
        self.submit(transport, DbCommand::Add { request, on_done });
    }

    /// Frees the entry's slot on the device by rewriting it as unused.
    pub fn delete_on_device<T: DbWriteTransport + ?Sized>(
        &mut self,
        transport: &mut T,
        entry: LinkEntry,
        on_done: Option<OnDone>,
    ) {
        self.submit(transport, DbCommand::Delete { entry, on_done });
    }

    /// Feeds the device's answer for the write in flight. Returns `false`
    /// when nothing was waiting for it.
    pub fn handle_write_outcome<T: DbWriteTransport + ?Sized>(
        &mut self,
        transport: &mut T,
        outcome: WriteOutcome,
    ) -> bool {
        let device = self.db.addr();
        let Some(mut op) = self.in_flight.take() else {
            warn!(device = %device, outcome = outcome.label(), "write outcome with no write in flight");
            return false;
        };

        let report = match op.exchange.resume(outcome) {
            DbModifyStep::Commit { entry, next } => {
                self.commit(entry);
                match next {
                    Some(request) => match transport.send(&request) {
                        Ok(()) => {
                            debug!(device = %device, mem_loc = %request.mem_loc(), "sent followup write");
                            self.in_flight = Some(op);
                            return true;
                        }
                        Err(err) => {
                            op.exchange.fail();
                            error!(device = %device, error = %err, "followup write not sent");
                            DbOpReport::failed(reason_codes::LINKDB_FAIL_TRANSPORT, update_failed(err))
                        }
                    },
                    None => {
                        let code = match op.kind {
                            DbOpKind::Add => reason_codes::LINKDB_OK_ADD,
                            DbOpKind::Delete => reason_codes::LINKDB_OK_DELETE,
                        };
                        info!(device = %device, entry = %op.exchange.entry(), "device db update complete");
                        DbOpReport::ok(code, MSG_UPDATE_COMPLETE, op.exchange.entry().clone())
                    }
                }
            }
            DbModifyStep::Failed { outcome } => {
                warn!(
                    device = %device,
                    mem_loc = %op.exchange.entry().mem_loc,
                    outcome = outcome.label(),
                    "device db write failed"
                );
                DbOpReport::failed(
                    reason_codes::LINKDB_FAIL_TRANSPORT,
                    update_failed(outcome.label()),
                )
            }
            DbModifyStep::Ignored => {
                self.in_flight = Some(op);
                return false;
            }
        };

        let mut done = vec![(op.on_done, report)];
        self.run_pending(transport, &mut done);
        fire(done);
        true
    }

    fn submit<T: DbWriteTransport + ?Sized>(&mut self, transport: &mut T, command: DbCommand) {
        if self.in_flight.is_none() {
            let mut done = Vec::new();
            if let Some(c) = self.start(transport, command) {
                done.push(c);
            }
            self.run_pending(transport, &mut done);
            fire(done);
            return;
        }

        if self.pending.len() >= usize::from(self.config.max_pending_ops) {
            warn!(
                device = %self.db.addr(),
                op = command.label(),
                max_pending_ops = self.config.max_pending_ops,
                "device db queue full"
            );
            let on_done = match command {
                DbCommand::Add { on_done, .. } | DbCommand::Delete { on_done, .. } => on_done,
            };
            fire(vec![(
                on_done,
                DbOpReport::failed(
                    reason_codes::LINKDB_FAIL_BUSY,
                    update_failed("too many pending requests"),
                ),
            )]);
            return;
        }

        info!(
            device = %self.db.addr(),
            op = command.label(),
            queued = self.pending.len() + 1,
            "device busy, request queued"
        );
        self.pending.push_back(command);
    }

    /// Starts queued commands until one leaves a write in flight or the queue
    /// is empty. Commands that finish without a write are appended to `done`.
    fn run_pending<T: DbWriteTransport + ?Sized>(
        &mut self,
        transport: &mut T,
        done: &mut Vec<Completion>,
    ) {
        while self.in_flight.is_none() {
            let Some(command) = self.pending.pop_front() else {
                break;
            };
            debug!(
                device = %self.db.addr(),
                op = command.label(),
                remaining = self.pending.len(),
                "starting queued request"
            );
            if let Some(c) = self.start(transport, command) {
                done.push(c);
            }
        }
    }

    /// Either puts a write in flight and returns `None`, or finishes the
    /// command on the spot.
    fn start<T: DbWriteTransport + ?Sized>(
        &mut self,
        transport: &mut T,
        command: DbCommand,
    ) -> Option<Completion> {
        let (kind, plan, on_done) = match command {
            DbCommand::Add { request, on_done } => (DbOpKind::Add, self.plan_add(&request), on_done),
            DbCommand::Delete { entry, on_done } => {
                (DbOpKind::Delete, self.plan_delete(&entry), on_done)
            }
        };
        let exchange = match plan {
            Ok(exchange) => exchange,
            Err(report) => return Some((on_done, report)),
        };

        match transport.send(&exchange.first_request()) {
            Ok(()) => {
                self.in_flight = Some(InFlightOp {
                    kind,
                    exchange,
                    on_done,
                });
                None
            }
            Err(err) => {
                error!(device = %self.db.addr(), error = %err, "device db write not sent");
                Some((
                    on_done,
                    DbOpReport::failed(reason_codes::LINKDB_FAIL_TRANSPORT, update_failed(err)),
                ))
            }
        }
    }

    fn plan_add(&self, request: &DbAddRequest) -> Result<DbModifyExchange, DbOpReport> {
        let device = self.db.addr();
        if let Some(existing) = self
            .db
            .find(request.addr, request.group, request.is_controller)
        {
            warn!(device = %device, entry = %existing, "add requested for existing entry");
            return Err(DbOpReport::ok(
                reason_codes::LINKDB_OK_ADD_EXISTS,
                MSG_ENTRY_EXISTS,
                existing.clone(),
            ));
        }

        if let Some(free) = self.db.highest_unused() {
            let mut entry = free.clone();
            entry.update_from(
                request.addr,
                request.group,
                request.is_controller,
                request.data,
            );
            info!(device = %device, mem_loc = %entry.mem_loc, peer = %request.addr, "reusing unused slot");
            return Ok(DbModifyExchange::new(device, entry));
        }

        let Some(last) = self.db.last_entry() else {
            error!(device = %device, known_slots = self.db.mem_locs().len(), "no last record entry");
            return Err(DbOpReport::failed(
                reason_codes::LINKDB_FAIL_STRUCTURE,
                update_failed("no last record entry"),
            ));
        };
        let new_entry = last
            .mem_loc
            .next_below()
            .and_then(|mem_loc| {
                LinkEntry::v1(
                    request.addr,
                    request.group,
                    mem_loc,
                    DbFlags {
                        in_use: true,
                        is_controller: request.is_controller,
                        is_last_rec: true,
                    },
                    request.data,
                )
                .ok()
            });
        let Some(new_entry) = new_entry else {
            error!(device = %device, last = %last.mem_loc, "link table has no room below last record");
            return Err(DbOpReport::failed(
                reason_codes::LINKDB_FAIL_STRUCTURE,
                update_failed("link table is full"),
            ));
        };

        let mut old_last = last.clone();
        old_last.db_flags.is_last_rec = false;
        info!(
            device = %device,
            mem_loc = %new_entry.mem_loc,
            peer = %request.addr,
            "appending new last record"
        );
        let mut exchange = DbModifyExchange::new(device, new_entry);
        exchange.add_followup(old_last);
        Ok(exchange)
    }

    fn plan_delete(&self, entry: &LinkEntry) -> Result<DbModifyExchange, DbOpReport> {
        let device = self.db.addr();
        let Some(current) = self.db.find_mem_loc(entry.mem_loc) else {
            warn!(device = %device, mem_loc = %entry.mem_loc, "delete requested for slot not in use");
            return Err(DbOpReport::failed(
                reason_codes::LINKDB_FAIL_INVALID,
                update_failed(format!("no entry in use at {}", entry.mem_loc)),
            ));
        };
        // The slot may have been freed and reused since the caller read it.
        if current.addr != entry.addr
            || current.group != entry.group
            || current.db_flags.is_controller != entry.db_flags.is_controller
        {
            warn!(
                device = %device,
                requested = %entry,
                current = %current,
                "delete requested for a link the slot no longer holds"
            );
            return Err(DbOpReport::failed(
                reason_codes::LINKDB_FAIL_INVALID,
                update_failed(format!("slot {} holds a different link", entry.mem_loc)),
            ));
        }
        let mut freed = current.clone();
        freed.db_flags.in_use = false;
        info!(device = %device, entry = %current, "freeing slot");
        Ok(DbModifyExchange::new(device, freed))
    }

    fn commit(&mut self, entry: LinkEntry) {
        let mem_loc = entry.mem_loc;
        if let Err(err) = self.db.add_entry(entry) {
            // The device already holds the change; keep the mirror and report
            // the snapshot loss only through the log.
            error!(device = %self.db.addr(), mem_loc = %mem_loc, error = %err, "device db snapshot write failed");
        }
    }
}

fn fire(done: Vec<Completion>) {
    for (on_done, report) in done {
        if let Some(cb) = on_done {
            cb(report);
        }
    }
}
