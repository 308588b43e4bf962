//! Test double for `TcpStack`. Lets the endpoint bridge's tests drive every
//! callback path deterministically: queue a `PcbEvent`, inspect recorded
//! `tcp_write` calls, and force a specific `ErrCode` from the next
//! `tcp_write`/`tcp_connect`/`tcp_bind` without needing a live network
//! stack underneath.

use super::{ErrCode, PcbEvent, PcbHandle, TcpStack};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::net::IpAddr;

#[derive(Debug, Clone, Default)]
struct MockPcb {
    local: Option<(IpAddr, u16)>,
    sndbuf: usize,
    mss: usize,
    nodelay: bool,
}

#[derive(Default)]
pub struct MockStack {
    next_id: u64,
    pcbs: FxHashMap<PcbHandle, MockPcb>,
    events: VecDeque<PcbEvent>,
    write_log: Vec<(PcbHandle, Vec<u8>)>,
    shutdown_log: Vec<(PcbHandle, bool, bool)>,
    bind_result: ErrCode,
    connect_result: ErrCode,
    write_result: Option<ErrCode>,
    output_result: ErrCode,
}

impl MockStack {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            bind_result: ErrCode::Ok,
            connect_result: ErrCode::Ok,
            output_result: ErrCode::Ok,
            ..Default::default()
        }
    }

    /// Appends an event the next `poll_events()` call will drain, in order.
    pub fn queue_event(&mut self, event: PcbEvent) {
        self.events.push_back(event);
    }

    pub fn set_sndbuf(&mut self, pcb: PcbHandle, value: usize) {
        if let Some(p) = self.pcbs.get_mut(&pcb) {
            p.sndbuf = value;
        }
    }

    pub fn set_mss(&mut self, pcb: PcbHandle, value: usize) {
        if let Some(p) = self.pcbs.get_mut(&pcb) {
            p.mss = value;
        }
    }

    pub fn force_bind_result(&mut self, result: ErrCode) {
        self.bind_result = result;
    }

    pub fn force_connect_result(&mut self, result: ErrCode) {
        self.connect_result = result;
    }

    /// Forces the next `tcp_write` call to return `result` instead of
    /// succeeding. Consumed by the following call.
    pub fn force_next_write_result(&mut self, result: ErrCode) {
        self.write_result = Some(result);
    }

    pub fn force_output_result(&mut self, result: ErrCode) {
        self.output_result = result;
    }

    pub fn write_log(&self) -> &[(PcbHandle, Vec<u8>)] {
        &self.write_log
    }

    /// Every `tcp_shutdown(pcb, rx, tx)` call, in order.
    pub fn shutdown_log(&self) -> &[(PcbHandle, bool, bool)] {
        &self.shutdown_log
    }

    pub fn nodelay(&self, pcb: PcbHandle) -> bool {
        self.pcbs.get(&pcb).map(|p| p.nodelay).unwrap_or(false)
    }

    pub fn is_live(&self, pcb: PcbHandle) -> bool {
        self.pcbs.contains_key(&pcb)
    }
}

impl TcpStack for MockStack {
    fn tcp_new(&mut self) -> PcbHandle {
        let pcb = PcbHandle(self.next_id);
        self.next_id += 1;
        self.pcbs.insert(
            pcb,
            MockPcb {
                sndbuf: usize::MAX,
                mss: 1460,
                ..Default::default()
            },
        );
        pcb
    }

    fn tcp_bind(&mut self, pcb: PcbHandle, addr: IpAddr, port: u16) -> ErrCode {
        if self.bind_result.is_ok() {
            if let Some(p) = self.pcbs.get_mut(&pcb) {
                p.local = Some((addr, port));
            }
        }
        self.bind_result
    }

    fn tcp_connect(&mut self, _pcb: PcbHandle, _addr: IpAddr, _port: u16) -> ErrCode {
        self.connect_result
    }

    fn tcp_abort(&mut self, pcb: PcbHandle) {
        self.pcbs.remove(&pcb);
    }

    fn tcp_close(&mut self, pcb: PcbHandle) -> ErrCode {
        self.pcbs.remove(&pcb);
        ErrCode::Ok
    }

    fn tcp_shutdown(&mut self, pcb: PcbHandle, rx: bool, tx: bool) -> ErrCode {
        self.shutdown_log.push((pcb, rx, tx));
        if rx && tx {
            self.pcbs.remove(&pcb);
        }
        ErrCode::Ok
    }

    fn tcp_write(&mut self, pcb: PcbHandle, data: &[u8], _flags: u8) -> ErrCode {
        if let Some(result) = self.write_result.take() {
            if !result.is_ok() {
                return result;
            }
        }
        self.write_log.push((pcb, data.to_vec()));
        ErrCode::Ok
    }

    fn tcp_output(&mut self, _pcb: PcbHandle) -> ErrCode {
        self.output_result
    }

    fn tcp_recved(&mut self, _pcb: PcbHandle, _len: usize) {}

    fn tcp_sndbuf(&self, pcb: PcbHandle) -> usize {
        self.pcbs.get(&pcb).map(|p| p.sndbuf).unwrap_or(0)
    }

    fn tcp_mss(&self, pcb: PcbHandle) -> usize {
        self.pcbs.get(&pcb).map(|p| p.mss).unwrap_or(1460)
    }

    fn tcp_set_nodelay(&mut self, pcb: PcbHandle, enabled: bool) {
        if let Some(p) = self.pcbs.get_mut(&pcb) {
            p.nodelay = enabled;
        }
    }

    fn local_endpoint(&self, pcb: PcbHandle) -> Option<(IpAddr, u16)> {
        self.pcbs.get(&pcb).and_then(|p| p.local)
    }

    fn poll_events(&mut self) -> Vec<PcbEvent> {
        self.events.drain(..).collect()
    }
}
