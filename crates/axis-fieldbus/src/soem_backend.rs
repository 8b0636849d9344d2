//! SOEM-based transport.
//!
//! Real EtherCAT master over the `soem` crate (Simple Open EtherCAT Master
//! bindings). Linux only; raw sockets require CAP_NET_RAW or root.
//!
//! The SOEM context borrows every buffer it works on, so the buffers live
//! in [`SoemInner`] and a short-lived context is created per operation.
//! The inner state sits behind a mutex so the supervisor's SDO channel can
//! run against the same context the cyclic thread is exchanging on; SOEM
//! serialises mailbox traffic against process data internally.

use crate::al_state::AlState;
use crate::transport::{FieldbusTransport, SdoChannel, SlaveInfo};
use axis_common::{MotionError, MotionResult};
use std::ffi::c_int;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Maximum number of slaves supported.
const MAX_SLAVES: usize = 8;

/// Maximum number of groups.
const MAX_GROUPS: usize = 2;

/// I/O map size (4KB as per the SOEM API).
const IO_MAP_SIZE: usize = 4096;

/// Linux capability bit for CAP_NET_RAW.
const CAP_NET_RAW_BIT: u32 = 13;

/// Context buffers and cached bus facts.
struct SoemInner {
    interface: Option<String>,
    port: soem::Port,
    slaves: Vec<soem::Slave>,
    slave_count: c_int,
    groups: Vec<soem::Group>,
    esibuf: Vec<soem::ESIBuf>,
    esimap: Vec<soem::ESIMap>,
    elist: Vec<soem::ERing>,
    idxstack: Vec<soem::IdxStack>,
    ecaterror: Vec<soem::Boolean>,
    dc_time: i64,
    sm_commtype: Vec<soem::SMCommType>,
    pdo_assign: Vec<soem::PDOAssign>,
    pdo_desc: Vec<soem::PDODesc>,
    eep_sm: Vec<soem::EEPROMSM>,
    eep_fmmu: Vec<soem::EEPROMFMMU>,
    io_map: Box<[u8; IO_MAP_SIZE]>,
    output_bytes: usize,
    input_bytes: usize,
    expected_wkc: i32,
    requested_state: AlState,
}

impl SoemInner {
    fn new() -> Self {
        Self {
            interface: None,
            port: soem::Port::default(),
            slaves: vec![soem::Slave::default(); MAX_SLAVES + 1], // +1 for master slot
            slave_count: 0,
            groups: vec![soem::Group::default(); MAX_GROUPS],
            esibuf: vec![soem::ESIBuf::default(); MAX_SLAVES],
            esimap: vec![soem::ESIMap::default(); MAX_SLAVES],
            elist: vec![soem::ERing::default(); MAX_SLAVES],
            idxstack: vec![soem::IdxStack::default(); MAX_SLAVES],
            ecaterror: vec![soem::Boolean::default(); MAX_SLAVES],
            dc_time: 0,
            sm_commtype: vec![soem::SMCommType::default(); MAX_SLAVES],
            pdo_assign: vec![soem::PDOAssign::default(); MAX_SLAVES],
            pdo_desc: vec![soem::PDODesc::default(); MAX_SLAVES],
            eep_sm: vec![soem::EEPROMSM::default(); MAX_SLAVES],
            eep_fmmu: vec![soem::EEPROMFMMU::default(); MAX_SLAVES],
            io_map: Box::new([0u8; IO_MAP_SIZE]),
            output_bytes: 0,
            input_bytes: 0,
            expected_wkc: 0,
            requested_state: AlState::Init,
        }
    }

    /// Run `f` against a context borrowing this struct's buffers.
    fn with_context<F, T>(&mut self, f: F) -> MotionResult<T>
    where
        F: FnOnce(&mut soem::Context<'_>) -> MotionResult<T>,
    {
        let interface = self.interface.clone().ok_or(MotionError::LinkOpen {
            interface: "<unopened>".into(),
        })?;

        let mut context = soem::Context::new(
            &[&interface],
            &mut self.port,
            &mut self.slaves,
            &mut self.slave_count,
            &mut self.groups,
            &mut self.esibuf,
            &mut self.esimap,
            &mut self.elist,
            &mut self.idxstack,
            &mut self.ecaterror,
            &mut self.dc_time,
            &mut self.sm_commtype,
            &mut self.pdo_assign,
            &mut self.pdo_desc,
            &mut self.eep_sm,
            &mut self.eep_fmmu,
        )
        .map_err(|_| MotionError::LinkOpen { interface })?;

        f(&mut context)
    }

    fn to_soem_state(state: AlState) -> soem::EtherCatState {
        match state {
            AlState::Init => soem::EtherCatState::Init,
            AlState::PreOp => soem::EtherCatState::PreOp,
            AlState::SafeOp => soem::EtherCatState::SafeOp,
            AlState::Op => soem::EtherCatState::Op,
            AlState::Error => soem::EtherCatState::Init,
        }
    }

    fn from_soem_state(state: soem::EtherCatState) -> AlState {
        match state {
            soem::EtherCatState::Init => AlState::Init,
            soem::EtherCatState::PreOp => AlState::PreOp,
            soem::EtherCatState::SafeOp => AlState::SafeOp,
            soem::EtherCatState::Op => AlState::Op,
            _ => AlState::Error,
        }
    }

    fn sdo_read(
        &mut self,
        slave: u16,
        index: u16,
        subindex: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> MotionResult<usize> {
        let timeout_us = timeout.as_micros() as c_int;
        self.with_context(|ctx| {
            // Expedited objects are 1, 2 or 4 bytes; try widest first
            if let Ok(value) = ctx.read_sdo::<u32>(slave, index, subindex, timeout_us) {
                if buf.len() >= 4 {
                    buf[..4].copy_from_slice(&value.to_le_bytes());
                    return Ok(4);
                }
            }
            if let Ok(value) = ctx.read_sdo::<u16>(slave, index, subindex, timeout_us) {
                if buf.len() >= 2 {
                    buf[..2].copy_from_slice(&value.to_le_bytes());
                    return Ok(2);
                }
            }
            if let Ok(value) = ctx.read_sdo::<u8>(slave, index, subindex, timeout_us) {
                if !buf.is_empty() {
                    buf[0] = value;
                    return Ok(1);
                }
            }
            Err(MotionError::SdoFailure {
                op: "read",
                slave,
                index,
                subindex,
            })
        })
    }

    fn sdo_write(
        &mut self,
        slave: u16,
        index: u16,
        subindex: u8,
        data: &[u8],
        timeout: Duration,
    ) -> MotionResult<()> {
        let timeout_us = timeout.as_micros() as c_int;
        let failure = MotionError::SdoFailure {
            op: "write",
            slave,
            index,
            subindex,
        };

        self.with_context(|ctx| match data.len() {
            1 => ctx
                .write_sdo(slave, index, subindex, &data[0], timeout_us)
                .map_err(|_| failure.clone()),
            2 => {
                let value = u16::from_le_bytes([data[0], data[1]]);
                ctx.write_sdo(slave, index, subindex, &value, timeout_us)
                    .map_err(|_| failure.clone())
            }
            4 => {
                let value = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
                ctx.write_sdo(slave, index, subindex, &value, timeout_us)
                    .map_err(|_| failure.clone())
            }
            _ => Err(failure.clone()),
        })
    }
}

/// Real EtherCAT transport over SOEM.
pub struct SoemTransport {
    inner: Arc<Mutex<SoemInner>>,
}

impl SoemTransport {
    /// Allocate the context buffers; the NIC is bound in `open`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SoemInner::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SoemInner> {
        self.inner.lock().expect("soem context poisoned")
    }

    fn check_interface_exists(interface: &str) -> MotionResult<()> {
        let path = format!("/sys/class/net/{interface}");
        if !Path::new(&path).exists() {
            return Err(MotionError::LinkOpen {
                interface: interface.to_string(),
            });
        }
        Ok(())
    }

    fn has_cap_net_raw() -> bool {
        let status = match fs::read_to_string("/proc/self/status") {
            Ok(status) => status,
            Err(_) => return false,
        };

        for line in status.lines() {
            if let Some(value) = line.strip_prefix("CapEff:\t") {
                if let Ok(bits) = u64::from_str_radix(value.trim(), 16) {
                    return (bits & (1u64 << CAP_NET_RAW_BIT)) != 0;
                }
                break;
            }
        }
        false
    }

    fn check_raw_socket_privilege(interface: &str) -> MotionResult<()> {
        // SAFETY: geteuid has no preconditions
        let is_root = unsafe { libc::geteuid() == 0 };
        if is_root || Self::has_cap_net_raw() {
            return Ok(());
        }
        warn!("raw sockets need CAP_NET_RAW or root");
        Err(MotionError::LinkOpen {
            interface: interface.to_string(),
        })
    }
}

impl Default for SoemTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SdoChannel for SoemTransport {
    fn sdo_read(
        &mut self,
        slave: u16,
        index: u16,
        subindex: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> MotionResult<usize> {
        self.lock().sdo_read(slave, index, subindex, buf, timeout)
    }

    fn sdo_write(
        &mut self,
        slave: u16,
        index: u16,
        subindex: u8,
        data: &[u8],
        timeout: Duration,
    ) -> MotionResult<()> {
        self.lock().sdo_write(slave, index, subindex, data, timeout)
    }
}

impl FieldbusTransport for SoemTransport {
    fn open(&mut self, interface: &str) -> MotionResult<()> {
        Self::check_interface_exists(interface)?;
        Self::check_raw_socket_privilege(interface)?;

        let mut inner = self.lock();
        inner.interface = Some(interface.to_string());
        // Binding happens on first context creation; probe it now so a bad
        // NIC fails here and not in the middle of bring-up.
        inner.with_context(|_ctx| Ok(()))?;
        info!(interface, "SOEM context initialized");
        Ok(())
    }

    fn config_init(&mut self) -> MotionResult<usize> {
        let mut inner = self.lock();
        let interface = inner.interface.clone().unwrap_or_default();
        let count = inner.with_context(|ctx| {
            ctx.config_init(false)
                .map_err(|_| MotionError::NoSlaves {
                    interface: interface.clone(),
                })
        })?;
        debug!(count, "config_init complete");
        Ok(count.max(0) as usize)
    }

    fn config_map(&mut self) -> MotionResult<()> {
        let mut inner = self.lock();

        // SAFETY: io_map is owned by SoemInner, has a stable address, and
        // outlives the short-lived context created below.
        let io_map: &mut [u8; IO_MAP_SIZE] = unsafe {
            &mut *(std::ptr::addr_of_mut!(*inner.io_map)).cast::<[u8; IO_MAP_SIZE]>()
        };

        inner.with_context(|ctx| {
            ctx.config_map_group(io_map, 0)
                .map_err(|_| MotionError::Config("PDO mapping failed".into()))?;
            Ok(())
        })?;

        let expected = inner.with_context(|ctx| Ok(i32::from(ctx.groups()[0].expected_wkc())))?;
        inner.expected_wkc = expected;

        let count = inner.slave_count.max(0) as usize;
        inner.output_bytes = inner.slaves[1..=count]
            .iter()
            .map(|s| s.output_size() as usize)
            .sum();
        inner.input_bytes = inner.slaves[1..=count]
            .iter()
            .map(|s| s.input_size() as usize)
            .sum();

        debug!(
            expected,
            outputs = inner.output_bytes,
            inputs = inner.input_bytes,
            "group 0 mapped"
        );
        Ok(())
    }

    fn config_dc(&mut self) -> MotionResult<bool> {
        self.lock().with_context(|ctx| {
            ctx.config_dc()
                .map_err(|_| MotionError::Config("DC configuration failed".into()))
        })
    }

    fn slave_count(&self) -> usize {
        self.lock().slave_count.max(0) as usize
    }

    fn slave_info(&self, position: u16) -> Option<SlaveInfo> {
        let inner = self.lock();
        let idx = position as usize;
        if position == 0 || idx > inner.slave_count.max(0) as usize {
            return None;
        }
        let slave = inner.slaves.get(idx)?;
        Some(SlaveInfo {
            position,
            name: slave.name().to_string(),
            al_state: SoemInner::from_soem_state(slave.state()),
            al_status_code: 0,
            has_dc: slave.has_dc(),
            output_bytes: slave.output_size() as usize,
            input_bytes: slave.input_size() as usize,
        })
    }

    fn expected_wkc(&self) -> i32 {
        self.lock().expected_wkc
    }

    fn request_state(&mut self, state: AlState) -> MotionResult<()> {
        let mut inner = self.lock();
        inner.requested_state = state;
        let soem_state = SoemInner::to_soem_state(state);
        inner.with_context(|ctx| {
            ctx.set_state(soem_state, 0);
            ctx.write_state(0)
                .map_err(|_| MotionError::Config(format!("state request {state} failed")))?;
            Ok(())
        })
    }

    fn check_state(&mut self, state: AlState, timeout: Duration) -> AlState {
        let soem_state = SoemInner::to_soem_state(state);
        let timeout_us = timeout.as_micros() as c_int;
        self.lock()
            .with_context(|ctx| Ok(ctx.check_state(0, soem_state, timeout_us)))
            .map(SoemInner::from_soem_state)
            .unwrap_or(AlState::Error)
    }

    fn read_state(&mut self) -> AlState {
        // A 1-tick statecheck doubles as a non-blocking state read
        let mut inner = self.lock();
        let soem_state = SoemInner::to_soem_state(inner.requested_state);
        inner
            .with_context(|ctx| Ok(ctx.check_state(0, soem_state, 1)))
            .map(SoemInner::from_soem_state)
            .unwrap_or(AlState::Error)
    }

    fn dc_time(&mut self) -> i64 {
        self.lock()
            .with_context(|ctx| Ok(ctx.dc_time()))
            .unwrap_or(0)
    }

    fn send_pdo(&mut self, outputs: &[u8]) -> MotionResult<()> {
        let mut inner = self.lock();
        let len = outputs.len().min(IO_MAP_SIZE);
        inner.io_map[..len].copy_from_slice(&outputs[..len]);
        inner.with_context(|ctx| {
            ctx.send_processdata();
            Ok(())
        })
    }

    fn receive_pdo(&mut self, inputs: &mut [u8], timeout: Duration) -> i32 {
        let mut inner = self.lock();
        let timeout_us = timeout.as_micros() as c_int;
        let wkc = inner
            .with_context(|ctx| Ok(i32::from(ctx.receive_processdata(timeout_us))))
            .unwrap_or(-1);

        // Inputs follow outputs in the group 0 I/O map
        let start = inner.output_bytes;
        let len = inputs.len().min(IO_MAP_SIZE.saturating_sub(start));
        inputs[..len].copy_from_slice(&inner.io_map[start..start + len]);
        wkc
    }

    fn sdo_channel(&self) -> Box<dyn SdoChannel> {
        Box::new(SoemSdoChannel {
            inner: Arc::clone(&self.inner),
        })
    }

    fn close(&mut self) {
        let mut inner = self.lock();
        inner.interface = None;
        inner.slave_count = 0;
        inner.expected_wkc = 0;
        debug!("SOEM transport closed");
    }
}

/// Mailbox handle sharing the SOEM context.
struct SoemSdoChannel {
    inner: Arc<Mutex<SoemInner>>,
}

impl SdoChannel for SoemSdoChannel {
    fn sdo_read(
        &mut self,
        slave: u16,
        index: u16,
        subindex: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> MotionResult<usize> {
        self.inner
            .lock()
            .expect("soem context poisoned")
            .sdo_read(slave, index, subindex, buf, timeout)
    }

    fn sdo_write(
        &mut self,
        slave: u16,
        index: u16,
        subindex: u8,
        data: &[u8],
        timeout: Duration,
    ) -> MotionResult<()> {
        self.inner
            .lock()
            .expect("soem context poisoned")
            .sdo_write(slave, index, subindex, data, timeout)
    }
}
