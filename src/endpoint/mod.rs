//! The TCP endpoint bridge. Mediates between the embedded TCP/IP stack's
//! per-connection callbacks and the outer runtime's [`Endpoint`] abstraction.
//!
//! Every function here is a free function taking `&mut impl Endpoint` and
//! `&mut dyn TcpStack` rather than a method on an owning struct: the bridge
//! state (`pcb`, `pcb_aborted`) is *embedded in the runtime endpoint itself*,
//! not held separately by this module. [`set_pcb`] is the sole mutator of
//! that state.

#[cfg(test)]
mod tests;

use crate::error::NetworkError;
use crate::logger::{self, BreadcrumbFlags};
use crate::runtime::{Endpoint, EndpointFlags, EndpointState, ErrorSource, Side};
use crate::stack::{ErrCode, PacketBuffer, PcbHandle, TcpStack, TCP_WRITE_FLAG_COPY};
use rustc_hash::FxHashMap;
use std::net::SocketAddr;

/// Opaque identity the driver hands out for each runtime endpoint of this
/// driver's type. Used only as the value side of [`PcbTable`]; the bridge
/// itself never interprets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointId(pub u64);

/// The driver's PCB -> endpoint routing table. Stands in for lwIP's
/// `tcp_arg`/`tcp_recv`/`tcp_sent`/`tcp_err` callback registration: since
/// this facade delivers events by polling (`TcpStack::poll_events`) rather
/// than direct fn-pointer invocation, "wiring" and "clearing" a PCB's
/// callbacks becomes inserting/removing its entry here. [`set_pcb`] is the
/// only code that touches it.
#[derive(Debug, Default)]
pub struct PcbTable {
    owner: FxHashMap<PcbHandle, EndpointId>,
}

impl PcbTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn owner_of(&self, pcb: PcbHandle) -> Option<EndpointId> {
        self.owner.get(&pcb).copied()
    }
}

/// Final `ERR_OK`/`ERR_ABRT` decision every callback makes on return:
/// `ERR_ABRT` iff this callback invocation caused `pcb_aborted` to be set.
fn finish<E: Endpoint>(endpoint: &mut E) -> ErrCode {
    if endpoint.bridge_state().pcb_aborted {
        ErrCode::Abrt
    } else {
        ErrCode::Ok
    }
}

/// The sole mutator of `endpoint.pcb`.
pub fn set_pcb<E: Endpoint, S: TcpStack + ?Sized>(
    endpoint: &mut E,
    stack: &mut S,
    table: &mut PcbTable,
    id: EndpointId,
    new_pcb: Option<PcbHandle>,
    do_abort: bool,
) {
    let old = endpoint.bridge_state().pcb.take();
    if let Some(old_pcb) = old {
        table.owner.remove(&old_pcb);
        if do_abort {
            endpoint.bridge_state().pcb_aborted = true;
            stack.tcp_abort(old_pcb);
        }
    }

    endpoint.bridge_state().pcb = new_pcb;
    if let Some(pcb) = new_pcb {
        endpoint.bridge_state().pcb_aborted = false;
        endpoint.bridge_state().rx_shutdown = false;
        endpoint.bridge_state().tx_shutdown = false;
        table.owner.insert(pcb, id);
    }
}

/// Outbound connect. Returns `Ok(())` on success, `Err(())` if a PCB was
/// already bound, the stack refused bind/connect, or the endpoint rejects
/// the transition into `Connecting`.
pub fn connect<E: Endpoint, S: TcpStack + ?Sized>(
    endpoint: &mut E,
    stack: &mut S,
    table: &mut PcbTable,
    id: EndpointId,
    remote: SocketAddr,
) -> Result<(), ()> {
    if endpoint.bridge_state().pcb.is_some() {
        return Err(());
    }

    let new_pcb = stack.tcp_new();

    if let Some(local) = endpoint.local_addr() {
        let err = stack.tcp_bind(new_pcb, local.ip(), local.port());
        if !err.is_ok() {
            logger::breadcrumb(
                BreadcrumbFlags::ENDPOINT,
                format!("tcp_bind failed for {local}: {}", err.strerror()),
            );
            stack.tcp_abort(new_pcb);
            return Err(());
        }
    }

    let err = stack.tcp_connect(new_pcb, remote.ip(), remote.port());
    if !err.is_ok() {
        logger::breadcrumb(
            BreadcrumbFlags::ENDPOINT,
            format!("tcp_connect failed for {remote}: {}", err.strerror()),
        );
        stack.tcp_abort(new_pcb);
        return Err(());
    }

    match endpoint.local_addr() {
        None => {
            if let Some((ip, port)) = stack.local_endpoint(new_pcb) {
                endpoint.set_local_addr(SocketAddr::new(ip, port));
            }
        }
        Some(_) => {
            if let Some((_, port)) = stack.local_endpoint(new_pcb) {
                endpoint.set_local_port(port);
            }
        }
    }

    set_pcb(endpoint, stack, table, id, Some(new_pcb), true);

    endpoint.set_state(EndpointState::Connecting).map_err(|_| ())
}

/// Forces `Deleting` when a transition is refused, the fallback every
/// callback below takes on a rejected transition.
fn set_state_or_delete<E: Endpoint>(endpoint: &mut E, state: EndpointState) {
    if endpoint.set_state(state).is_err() {
        let _ = endpoint.set_state(EndpointState::Deleting);
    }
}

fn record_error<E: Endpoint>(endpoint: &mut E, error: NetworkError) {
    if !endpoint.have_error() {
        endpoint.set_error(ErrorSource::Network, error);
    }
}

/// Handles the PCB's `connected` callback.
pub fn on_connected<E: Endpoint, S: TcpStack + ?Sized>(
    endpoint: &mut E,
    stack: &mut S,
    table: &mut PcbTable,
    id: EndpointId,
    result: ErrCode,
) -> ErrCode {
    if result.is_ok() {
        set_state_or_delete(endpoint, EndpointState::Established);
        return finish(endpoint);
    }

    set_pcb(endpoint, stack, table, id, None, true);
    record_error(endpoint, NetworkError::internal(result.strerror()));
    set_state_or_delete(endpoint, EndpointState::Error);
    ErrCode::Abrt
}

/// Handles the PCB's `recv` callback. `data == None` signals a peer FIN.
pub fn on_recv<E: Endpoint, S: TcpStack + ?Sized>(
    endpoint: &mut E,
    stack: &mut S,
    table: &mut PcbTable,
    id: EndpointId,
    data: Option<PacketBuffer>,
) -> ErrCode {
    let Some(p) = data else {
        // A release build falls through to `disable` rather than panicking
        // if somehow neither established nor write_closed.
        match endpoint.state() {
            EndpointState::Established => set_state_or_delete(endpoint, EndpointState::ReadClosed),
            other => {
                debug_assert!(
                    other == EndpointState::WriteClosed,
                    "peer FIN while endpoint is neither established nor write_closed"
                );
                set_state_or_delete(endpoint, EndpointState::Disable);
            }
        }
        return finish(endpoint);
    };

    if !endpoint.is_readable() {
        drop(p);
        return ErrCode::Ok;
    }

    let total_len = p.tot_len();
    let Some(dst) = endpoint.buf_alloc_at_least(Side::Read, total_len) else {
        drop(p);
        record_error(endpoint, NetworkError::internal("read buffer allocation failed"));
        set_state_or_delete(endpoint, EndpointState::Error);
        return finish(endpoint);
    };
    let copied = p.copy_partial(dst, 0);
    drop(p);

    let Some(pcb) = endpoint.bridge_state().pcb else {
        return finish(endpoint);
    };
    stack.tcp_recved(pcb, copied);

    if endpoint.buf_supply(Side::Read, copied).is_err() {
        set_pcb(endpoint, stack, table, id, None, true);
        record_error(endpoint, NetworkError::internal("runtime rejected buffered data"));
        set_state_or_delete(endpoint, EndpointState::Error);
    }
    finish(endpoint)
}

/// Handles the PCB's `sent` callback: an ack arrived for `_len` bytes.
pub fn on_sent<E: Endpoint, S: TcpStack + ?Sized>(endpoint: &mut E, stack: &mut S, _len: usize) -> ErrCode {
    do_write(endpoint, stack);

    if endpoint.state() == EndpointState::Established {
        if let Some(pcb) = endpoint.bridge_state().pcb {
            if endpoint.is_writing() && stack.tcp_sndbuf(pcb) > 0 {
                endpoint.set_flag(EndpointFlags::IS_WRITING, false);
            }
        }
    }
    finish(endpoint)
}

/// Handles the PCB's `err` callback. No return value: the stack has
/// already released the PCB.
pub fn on_err<E: Endpoint>(endpoint: &mut E, table: &mut PcbTable, pcb: PcbHandle, code: ErrCode) {
    // The stack released the PCB itself; unconditionally null it rather
    // than going through `set_pcb` (its callbacks are already gone).
    endpoint.bridge_state().pcb = None;
    table.owner.remove(&pcb);

    if code == ErrCode::Rst {
        record_error(endpoint, NetworkError::remote_reset(code.strerror()));
        set_state_or_delete(endpoint, EndpointState::Disable);
    } else {
        record_error(endpoint, NetworkError::internal(code.strerror()));
        set_state_or_delete(endpoint, EndpointState::Error);
    }
}

/// Drains the write buffer into the PCB while writable and non-empty. Any
/// error is recorded as fatal via `have_error`/state, except `ERR_MEM` which
/// is back-pressure, not a failure.
pub fn do_write<E: Endpoint, S: TcpStack + ?Sized>(endpoint: &mut E, stack: &mut S) {
    loop {
        if !endpoint.is_writeable() || endpoint.buf_is_empty(Side::Write) {
            break;
        }
        let Some(pcb) = endpoint.bridge_state().pcb else {
            break;
        };

        let sndbuf = stack.tcp_sndbuf(pcb);
        let want = endpoint.buf_size(Side::Write).min(sndbuf);
        if want == 0 {
            endpoint.set_flag(EndpointFlags::IS_WRITING, true);
            break;
        }

        let chunk = endpoint.buf_peek_with_size(Side::Write, want);
        let n = chunk.len();
        if n == 0 {
            endpoint.set_flag(EndpointFlags::IS_WRITING, true);
            break;
        }
        let data = chunk.to_vec();

        match stack.tcp_write(pcb, &data, TCP_WRITE_FLAG_COPY) {
            ErrCode::Ok => {
                endpoint.buf_consume(Side::Write, n);
            }
            ErrCode::Mem => break,
            other => {
                record_error(endpoint, NetworkError::internal(other.strerror()));
                set_state_or_delete(endpoint, EndpointState::Error);
                return;
            }
        }
    }

    if endpoint.is_writeable() {
        if let Some(pcb) = endpoint.bridge_state().pcb {
            if !stack.tcp_output(pcb).is_ok() {
                record_error(endpoint, NetworkError::internal("tcp_output failed"));
                set_state_or_delete(endpoint, EndpointState::Error);
            }
        }
    }
}

/// One-shot, state-driven action run once per tick for a live endpoint.
/// Each arm is a no-op when `pcb` is already null. Returns `Err(-1)` if a
/// stack call fails, for the caller to escalate.
pub fn update<E: Endpoint, S: TcpStack + ?Sized>(
    endpoint: &mut E,
    stack: &mut S,
    table: &mut PcbTable,
    id: EndpointId,
) -> Result<(), i32> {
    match endpoint.state() {
        EndpointState::ReadClosed => {
            if let Some(pcb) = endpoint.bridge_state().pcb {
                if !endpoint.bridge_state().rx_shutdown {
                    let err = stack.tcp_shutdown(pcb, true, false);
                    if !err.is_ok() {
                        return Err(-1);
                    }
                    endpoint.bridge_state().rx_shutdown = true;
                }
            }
        }
        EndpointState::WriteClosed => {
            if let Some(pcb) = endpoint.bridge_state().pcb {
                if !endpoint.bridge_state().tx_shutdown {
                    let err = stack.tcp_shutdown(pcb, false, true);
                    if !err.is_ok() {
                        return Err(-1);
                    }
                    endpoint.bridge_state().tx_shutdown = true;
                }
            }
        }
        EndpointState::Error => {
            if let Some(pcb) = endpoint.bridge_state().pcb {
                stack.tcp_close(pcb);
                // `set_pcb(..., do_abort=true)` is the sole abort path here;
                // an extra explicit `tcp_abort` call would abort the same
                // handle twice.
                set_pcb(endpoint, stack, table, id, None, true);
            }
        }
        EndpointState::Disable => {
            if let Some(pcb) = endpoint.bridge_state().pcb {
                // Whichever direction is still open: rx/tx_shutdown record
                // whatever a prior `read_closed`/`write_closed` action
                // already did to this pcb, so a direction isn't shut down
                // twice (e.g. peer-FIN-after-local-write-closed only needs
                // rx shut down here, tx having been closed already).
                let rx = !endpoint.bridge_state().rx_shutdown;
                let tx = !endpoint.bridge_state().tx_shutdown;
                if rx || tx {
                    let err = stack.tcp_shutdown(pcb, rx, tx);
                    if !err.is_ok() {
                        return Err(-1);
                    }
                }
                set_pcb(endpoint, stack, table, id, None, false);
            }
        }
        EndpointState::Established => {
            if !endpoint.buf_is_empty(Side::Write) {
                do_write(endpoint, stack);
            }
        }
        _ => {}
    }
    Ok(())
}

/// Per-endpoint capacity hints: `(readable, writeable)` byte counts.
pub fn calc_size<E: Endpoint, S: TcpStack + ?Sized>(endpoint: &E, stack: &S) -> (usize, usize) {
    let write = match endpoint.pcb() {
        Some(pcb) if endpoint.state() == EndpointState::Established => stack.tcp_sndbuf(pcb),
        _ => 0,
    };
    (0, write)
}

/// Toggles the PCB's Nagle flag.
pub fn set_no_delay<E: Endpoint, S: TcpStack + ?Sized>(endpoint: &E, stack: &mut S, enabled: bool) {
    if let Some(pcb) = endpoint.pcb() {
        stack.tcp_set_nodelay(pcb, enabled);
    }
}

/// The PCB's current MSS, or `0` if unbound.
pub fn get_mss<E: Endpoint, S: TcpStack + ?Sized>(endpoint: &E, stack: &S) -> usize {
    endpoint.pcb().map(|pcb| stack.tcp_mss(pcb)).unwrap_or(0)
}
