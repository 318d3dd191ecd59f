//! io_uring ring end-to-end smoke test
//!
//! Exercises the full ring stack on the running kernel:
//!   Part A - Setup: parameters, features, region sizes
//!   Part B - Submission: slot allocation, publish, wraparound, Full state,
//!            dropped slots
//!   Part C - Completion: nop round trips, concurrent producers
//!   Part D - File adapter: write, fsync, read back
//!   Part E - Teardown: close, double close, use-after-close
//!
//! Run: ./target/release/iouring-smoke
//! Env: IOURING_ENTRIES, IOURING_SQPOLL_IDLE_MS, IOURING_LOG_LEVEL=debug

use std::collections::HashSet;
use std::io::{Read, Write};
use std::sync::Arc;

use iouring::{Ring, RingConfig, RingError, RingState, SubmitEntry};
use iouring_core::opcode::feat;

/// Running pass/fail count; one line per check.
#[derive(Default)]
struct Tally {
    run: usize,
    failed: usize,
}

impl Tally {
    fn section(&self, name: &str) {
        println!("\n== {} ==", name);
    }

    fn check(&mut self, name: &str, ok: bool, reason: &str) {
        self.run += 1;
        if ok {
            println!("  ok   {}", name);
        } else {
            self.failed += 1;
            println!("  FAIL {}: {}", name, reason);
        }
    }

    fn finish(&self) -> ! {
        println!("\n{} checks, {} failed", self.run, self.failed);
        std::process::exit(if self.failed > 0 { 1 } else { 0 });
    }
}

/// Helper: push `n` nops, submit, wait for all of them, return their ids.
fn nops(ring: &Ring, n: u32) -> Result<Vec<u64>, RingError> {
    let mut ids = Vec::with_capacity(n as usize);
    for _ in 0..n {
        let id = ring.next_id();
        unsafe { ring.push(SubmitEntry::nop(id))? };
        ids.push(id);
    }
    ring.submit_and_wait(n)?;
    Ok(ids)
}

fn drain(ring: &Ring) -> Vec<u64> {
    let mut out = Vec::new();
    while let Ok(Some(cqe)) = ring.reap() {
        out.push(cqe.user_data);
    }
    out
}

// ════════════════════════════════════════════════════════════
// Part A: Setup
// ════════════════════════════════════════════════════════════

fn test_setup(t: &mut Tally, config: &RingConfig) -> Option<Ring> {
    t.section("Part A: Setup");

    let ring = match Ring::with_config(config.clone()) {
        Ok(r) => {
            t.check("io_uring_setup + mmap", true, "");
            r
        }
        Err(e) => {
            let why = format!("{} (kernel >= 5.1? seccomp?)", e);
            t.check("io_uring_setup + mmap", false, &why);
            return None;
        }
    };

    let p = ring.params();
    t.check(
        "sq_entries is a power of two >= requested",
        p.sq_entries.is_power_of_two() && p.sq_entries >= config.entries,
        &format!("sq_entries={}", p.sq_entries),
    );
    t.check(
        "cq_entries >= sq_entries",
        p.cq_entries >= p.sq_entries,
        &format!("cq={} sq={}", p.cq_entries, p.sq_entries),
    );
    println!(
        "       features=0x{:x} single_mmap={} sqpoll={}",
        p.features,
        p.has_feature(feat::SINGLE_MMAP),
        p.sqpoll()
    );
    t.check(
        "fresh ring: head == tail == 0, Empty",
        ring.submit_head() == Ok(0)
            && ring.submit_tail() == Ok(0)
            && ring.ring_state() == Ok(RingState::Empty),
        &format!("{:?} {:?} {:?}", ring.submit_head(), ring.submit_tail(), ring.ring_state()),
    );
    t.check("next_id starts at 1", ring.next_id() == 1, "first id != 1");

    Some(ring)
}

// ════════════════════════════════════════════════════════════
// Part B: Submission
// ════════════════════════════════════════════════════════════

fn test_submission(t: &mut Tally, ring: &Ring) {
    t.section("Part B: Submission");
    let size = ring.params().sq_entries;

    let mut indices = Vec::new();
    let mut ok = true;
    for _ in 0..size {
        match ring.allocate_slot() {
            Ok(slot) => {
                indices.push(slot.index());
                let id = ring.next_id();
                ok &= unsafe { ring.fill_slot(&slot, SubmitEntry::nop(id)) }.is_ok();
                ok &= ring.publish(slot).is_ok();
            }
            Err(_) => ok = false,
        }
    }
    let distinct: HashSet<u32> = indices.iter().copied().collect();
    t.check(
        "fill ring: indices distinct and in range",
        ok && distinct.len() == size as usize && indices.iter().all(|&i| i < size),
        &format!("{} distinct of {}", distinct.len(), size),
    );
    t.check(
        "saturated ring reports Full",
        ring.ring_state() == Ok(RingState::Full),
        &format!("{:?}", ring.ring_state()),
    );
    t.check(
        "try_allocate_slot on Full -> None",
        matches!(ring.try_allocate_slot(), Ok(None)),
        "got a slot",
    );

    let entered = ring.submit_and_wait(size);
    t.check("submit_and_wait(size)", entered == Ok(size), &format!("{:?}", entered));
    t.check(
        "state back to Empty after enter",
        ring.ring_state() == Ok(RingState::Empty),
        &format!("{:?}", ring.ring_state()),
    );
    let reaped = drain(ring).len();
    t.check("all completions reaped", reaped == size as usize, &format!("{}", reaped));

    let wrapped = ring.allocate_slot();
    t.check(
        "allocation wraps to index 0",
        matches!(&wrapped, Ok(s) if s.index() == 0 && s.seq() == size),
        &format!("{:?}", wrapped),
    );
    if let Ok(slot) = wrapped {
        let id = ring.next_id();
        let _ = unsafe { ring.fill_slot(&slot, SubmitEntry::nop(id)) };
        let _ = ring.publish(slot);
        let _ = ring.submit_and_wait(1);
        drain(ring);
    }

    // An unpublished slot is retired as a NOP and must not stall its successor.
    drop(ring.allocate_slot());
    let id = ring.next_id();
    let pushed = unsafe { ring.push(SubmitEntry::nop(id)) };
    let waited = ring.submit_and_wait(2);
    let seen = drain(ring);
    t.check(
        "dropped slot retired, successor completes",
        pushed.is_ok() && waited == Ok(2) && seen == vec![id],
        &format!("{:?} {:?} {:?}", pushed, waited, seen),
    );
    t.check("no dropped entries", ring.dropped() == Ok(0), &format!("{:?}", ring.dropped()));
}

// ════════════════════════════════════════════════════════════
// Part C: Completion
// ════════════════════════════════════════════════════════════

fn test_completion(t: &mut Tally, ring: &Arc<Ring>) {
    t.section("Part C: Completion");

    match nops(ring, 4) {
        Ok(ids) => {
            let mut seen = drain(ring);
            seen.sort_unstable();
            t.check("4 nops: user_data echoed", seen == ids, &format!("{:?} vs {:?}", seen, ids));
        }
        Err(e) => t.check("4 nops", false, &e.to_string()),
    }

    const THREADS: usize = 8;
    const PER_THREAD: usize = 500;
    // Producers also reap so the completion ring never backs up.
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let ring = Arc::clone(ring);
            std::thread::spawn(move || -> Result<(Vec<u64>, Vec<u64>), RingError> {
                let mut mine = Vec::with_capacity(PER_THREAD);
                let mut reaped = Vec::new();
                for _ in 0..PER_THREAD {
                    let id = ring.next_id();
                    unsafe { ring.push(SubmitEntry::nop(id))? };
                    ring.submit()?;
                    mine.push(id);
                    while let Some(cqe) = ring.reap()? {
                        reaped.push(cqe.user_data);
                    }
                }
                Ok((mine, reaped))
            })
        })
        .collect();

    let mut submitted = HashSet::new();
    let mut reaped = HashSet::new();
    let mut errors = Vec::new();
    for h in handles {
        match h.join() {
            Ok(Ok((ids, got))) => {
                submitted.extend(ids);
                reaped.extend(got);
            }
            Ok(Err(e)) => errors.push(e.to_string()),
            Err(_) => errors.push("producer panicked".into()),
        }
    }
    // SQPOLL completes asynchronously; give stragglers a moment.
    for _ in 0..200 {
        let _ = ring.submit();
        reaped.extend(drain(ring));
        if reaped.len() >= submitted.len() {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(1));
    }

    t.check(
        &format!("{}x{} concurrent producers", THREADS, PER_THREAD),
        errors.is_empty() && submitted.len() == THREADS * PER_THREAD,
        &format!("errors={:?} unique={}", errors, submitted.len()),
    );
    t.check(
        "every submitted id completed exactly once",
        reaped == submitted,
        &format!(
            "reaped={} submitted={} overflow={:?}",
            reaped.len(),
            submitted.len(),
            ring.overflow()
        ),
    );
}

// ════════════════════════════════════════════════════════════
// Part D: File adapter
// ════════════════════════════════════════════════════════════

fn test_file(t: &mut Tally, ring: &Ring) {
    t.section("Part D: File adapter");

    let path = std::env::temp_dir().join(format!("iouring-smoke-{}", std::process::id()));
    let file = match std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&path)
    {
        Ok(f) => f,
        Err(e) => {
            t.check("create temp file", false, &e.to_string());
            return;
        }
    };

    let mut f = ring.file(file);
    let payload = b"io_uring smoke payload\n";
    let w = f.write_all(payload);
    t.check("write_all via ring", w.is_ok(), &format!("{:?}", w.err()));
    let s = f.sync_all();
    t.check("fsync via ring", s.is_ok(), &format!("{:?}", s.err()));

    f.set_position(0);
    let mut back = Vec::new();
    let r = f.read_to_end(&mut back);
    t.check(
        "read back matches",
        r.is_ok() && back == payload,
        &format!("{:?} {:?}", r.err(), String::from_utf8_lossy(&back)),
    );

    drop(f);
    let _ = std::fs::remove_file(&path);
}

// ════════════════════════════════════════════════════════════
// Part E: Teardown
// ════════════════════════════════════════════════════════════

fn test_teardown(t: &mut Tally, ring: &Ring) {
    t.section("Part E: Teardown");

    let first = ring.close();
    t.check("close", first.is_ok(), &format!("{:?}", first));
    let second = ring.close();
    t.check("second close is a no-op", second.is_ok(), &format!("{:?}", second));
    t.check(
        "submit_head after close -> Closed",
        ring.submit_head() == Err(RingError::Closed),
        &format!("{:?}", ring.submit_head()),
    );
    t.check(
        "allocate_slot after close -> Closed",
        matches!(ring.allocate_slot(), Err(RingError::Closed)),
        "allocated on a closed ring",
    );
}

fn main() {
    println!("=== io_uring Ring Smoke Test ===");
    let kver = std::fs::read_to_string("/proc/version").unwrap_or_default();
    println!("    kernel: {}", kver.trim().split(' ').nth(2).unwrap_or("?"));

    let config = RingConfig::from_env(32);
    if let Err(e) = config.validate() {
        println!("\nFATAL: bad config: {}", e);
        std::process::exit(2);
    }
    println!("    config: {:?}", config);

    let mut t = Tally::default();

    let ring = match test_setup(&mut t, &config) {
        Some(r) => Arc::new(r),
        None => t.finish(),
    };

    test_submission(&mut t, &ring);
    test_completion(&mut t, &ring);
    test_file(&mut t, &ring);
    test_teardown(&mut t, &ring);

    t.finish();
}
