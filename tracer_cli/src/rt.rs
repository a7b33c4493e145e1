//! Real-time process setup for the control slots: memory locking,
//! SCHED_FIFO priority and CPU pinning. Every step is best effort; failures
//! become warnings and the run continues with normal scheduling.

use crate::cli::RtLock;
use std::sync::OnceLock;

static RT_ONCE: OnceLock<()> = OnceLock::new();

fn os_result(rc: libc::c_int) -> std::io::Result<()> {
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(unix)]
fn memlock_limit_hint() -> Option<String> {
    let mut rlim = std::mem::MaybeUninit::<libc::rlimit>::uninit();
    // SAFETY: getrlimit only writes the struct we hand it.
    let rc = unsafe { libc::getrlimit(libc::RLIMIT_MEMLOCK, rlim.as_mut_ptr()) };
    if rc != 0 {
        return None;
    }
    // SAFETY: initialized by the successful call above.
    let cur = unsafe { rlim.assume_init() }.rlim_cur;
    Some(if cur == libc::RLIM_INFINITY {
        "memlock limit: unlimited".to_string()
    } else {
        format!("memlock limit: {} KiB", cur / 1024)
    })
}

#[cfg(unix)]
fn lock_memory(lock: RtLock) -> eyre::Result<()> {
    let flags = match lock {
        RtLock::None => return Ok(()),
        RtLock::Current => libc::MCL_CURRENT,
        RtLock::All => libc::MCL_CURRENT | libc::MCL_FUTURE,
    };
    // SAFETY: mlockall has no memory-safety preconditions.
    let Err(err) = os_result(unsafe { libc::mlockall(flags) }) else {
        return Ok(());
    };
    let retryable = matches!(err.raw_os_error(), Some(c) if c == libc::EPERM || c == libc::ENOMEM);
    if lock == RtLock::All && retryable {
        // SAFETY: as above.
        if os_result(unsafe { libc::mlockall(libc::MCL_CURRENT) }).is_ok() {
            tracing::warn!(error = %err, "mlockall(current|future) failed; locked current pages only");
            return Ok(());
        }
    }
    let mut msg = format!("mlockall failed: {err}");
    if retryable {
        if let Some(h) = memlock_limit_hint() {
            msg.push_str(&format!("; {h}"));
        }
        msg.push_str("; needs CAP_IPC_LOCK (or root) and a sufficient 'ulimit -l'");
    }
    Err(eyre::eyre!(msg))
}

#[cfg(target_os = "linux")]
fn fifo_priority(prio: Option<i32>) -> eyre::Result<i32> {
    // SAFETY: plain queries without pointers.
    let (min, max) = unsafe {
        (
            libc::sched_get_priority_min(libc::SCHED_FIFO),
            libc::sched_get_priority_max(libc::SCHED_FIFO),
        )
    };
    let (min, max) = if min < 0 || max < 0 { (1, 99) } else { (min, max) };
    let p = prio.unwrap_or(max).clamp(min, max);
    let param = libc::sched_param { sched_priority: p };
    // SAFETY: `param` outlives the call.
    os_result(unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) }).map_err(|e| {
        eyre::eyre!("sched_setscheduler(SCHED_FIFO, {p}) failed: {e}; needs CAP_SYS_NICE or root")
    })?;
    Ok(p)
}

#[cfg(target_os = "linux")]
fn pin_cpu(cpu: usize) -> eyre::Result<()> {
    let bits = std::mem::size_of::<libc::cpu_set_t>() * 8;
    if cpu >= bits {
        eyre::bail!("CPU {cpu} exceeds cpu_set_t capacity {bits}");
    }
    // SAFETY: cpu_set_t is plain data; the CPU_* helpers stay within it
    // because `cpu < bits`.
    unsafe {
        let mut allowed: libc::cpu_set_t = std::mem::zeroed();
        os_result(libc::sched_getaffinity(
            0,
            std::mem::size_of::<libc::cpu_set_t>(),
            &mut allowed,
        ))?;
        if !libc::CPU_ISSET(cpu, &allowed) {
            eyre::bail!("CPU {cpu} not permitted by the current affinity mask");
        }
        let mut wanted: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut wanted);
        libc::CPU_SET(cpu, &mut wanted);
        os_result(libc::sched_setaffinity(
            0,
            std::mem::size_of::<libc::cpu_set_t>(),
            &wanted,
        ))?;
    }
    Ok(())
}

/// Apply real-time settings once per process when `rt` is set.
pub fn setup_rt_once(rt: bool, prio: Option<i32>, lock: RtLock, cpu: Option<usize>) {
    if !rt {
        return;
    }
    RT_ONCE.get_or_init(|| {
        #[cfg(unix)]
        match lock_memory(lock) {
            Ok(()) => tracing::info!(?lock, "rt: memory lock applied"),
            Err(e) => tracing::warn!(error = %e, "rt: memory lock not applied"),
        }
        #[cfg(target_os = "linux")]
        {
            match fifo_priority(prio) {
                Ok(p) => tracing::info!(prio = p, "rt: SCHED_FIFO"),
                Err(e) => tracing::warn!(error = %e, "rt: priority not applied"),
            }
            let cpu = cpu.unwrap_or(0);
            match pin_cpu(cpu) {
                Ok(()) => tracing::info!(cpu, "rt: pinned"),
                Err(e) => tracing::warn!(error = %e, "rt: affinity not applied"),
            }
        }
        #[cfg(not(target_os = "linux"))]
        {
            let _ = (prio, cpu);
            tracing::warn!("rt: SCHED_FIFO and affinity are only available on Linux");
        }
    });
}
