//! Windows native API helpers for process management.

use windows::Win32::Foundation::{CloseHandle, ERROR_INSUFFICIENT_BUFFER, NO_ERROR, STILL_ACTIVE};
use windows::Win32::NetworkManagement::IpHelper::{
    GetExtendedTcpTable, MIB_TCP6ROW_OWNER_PID, MIB_TCP6TABLE_OWNER_PID, MIB_TCPROW_OWNER_PID,
    MIB_TCPTABLE_OWNER_PID, TCP_TABLE_OWNER_PID_LISTENER,
};
use windows::Win32::Networking::WinSock::{AF_INET, AF_INET6};
use windows::Win32::System::Threading::{
    GetExitCodeProcess, OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION,
};

/// The table may grow between the size query and the data fetch.
const TCP_TABLE_MAX_RETRIES: usize = 4;

/// Fetch the listener table for one address family into an 8-byte aligned buffer.
fn fetch_tcp_table(af: u32) -> Option<Vec<u64>> {
    for _ in 0..TCP_TABLE_MAX_RETRIES {
        let mut size: u32 = 0;

        // A NULL table always reports ERROR_INSUFFICIENT_BUFFER with the required size.
        let ret = unsafe {
            GetExtendedTcpTable(None, &mut size, false, af, TCP_TABLE_OWNER_PID_LISTENER, 0)
        };
        if ret != ERROR_INSUFFICIENT_BUFFER.0 || size == 0 {
            return None;
        }

        let mut buffer = vec![0u64; (size as usize).div_ceil(8)];
        let ret = unsafe {
            GetExtendedTcpTable(
                Some(buffer.as_mut_ptr().cast()),
                &mut size,
                false,
                af,
                TCP_TABLE_OWNER_PID_LISTENER,
                0,
            )
        };

        if ret == NO_ERROR.0 {
            buffer.truncate((size as usize).div_ceil(8));
            return Some(buffer);
        }
        if ret != ERROR_INSUFFICIENT_BUFFER.0 {
            return None;
        }
    }
    None
}

/// Walk the rows of a fetched table, yielding `(local_port, owning_pid)` pairs.
///
/// `R` must be the row type matching the table fetched for `af`.
fn scan_rows<R: Copy>(
    af: u32,
    table_offset: usize,
    row_fields: fn(&R) -> (u32, u32),
    port: u16,
    pids: &mut Vec<u32>,
) -> Option<()> {
    let buffer = fetch_tcp_table(af)?;
    let buf_bytes = buffer.len() * 8;
    let row_size = std::mem::size_of::<R>();

    let num_entries = unsafe { std::ptr::read_unaligned(buffer.as_ptr() as *const u32) } as usize;

    for i in 0..num_entries {
        let offset = table_offset.checked_add(i.checked_mul(row_size)?)?;
        if offset.checked_add(row_size)? > buf_bytes {
            break;
        }

        let row = unsafe {
            std::ptr::read_unaligned((buffer.as_ptr() as *const u8).add(offset) as *const R)
        };
        let (raw_port, pid) = row_fields(&row);

        // dwLocalPort is network byte order in the low 16 bits.
        if u16::from_be((raw_port & 0xFFFF) as u16) == port && !pids.contains(&pid) {
            pids.push(pid);
        }
    }
    Some(())
}

/// PIDs listening on `port` over IPv4 or IPv6.
pub fn listening_pids(port: u16) -> Vec<u32> {
    let mut pids = Vec::new();
    let _ = scan_rows::<MIB_TCPROW_OWNER_PID>(
        AF_INET.0 as u32,
        std::mem::offset_of!(MIB_TCPTABLE_OWNER_PID, table),
        |row| (row.dwLocalPort, row.dwOwningPid),
        port,
        &mut pids,
    );
    let _ = scan_rows::<MIB_TCP6ROW_OWNER_PID>(
        AF_INET6.0 as u32,
        std::mem::offset_of!(MIB_TCP6TABLE_OWNER_PID, table),
        |row| (row.dwLocalPort, row.dwOwningPid),
        port,
        &mut pids,
    );
    pids
}

/// Check if a process is alive via OpenProcess + GetExitCodeProcess.
pub fn is_process_alive(pid: u32) -> bool {
    unsafe {
        match OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid) {
            Ok(handle) => {
                let mut exit_code: u32 = 0;
                let alive = GetExitCodeProcess(handle, &mut exit_code).is_ok()
                    && (exit_code as i32) == STILL_ACTIVE.0;
                let _ = CloseHandle(handle);
                alive
            }
            Err(_) => false,
        }
    }
}
