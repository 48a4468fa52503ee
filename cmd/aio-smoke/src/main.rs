//! AIO End-to-End Smoke Test
//!
//! Runs the request manager against every dispatch path:
//!   Part A: Worker path: OS file round trip, short reads, wait_any
//!   Part B: Batches: wait mode, no-wait group notice, NoOp entries
//!   Part C: Readiness path: parked socket reads promoted on data
//!   Part D: Direct path: in-memory disk, and io_uring disk on Linux
//!   Part E: Cancel, timeouts and interrupts
//!   Part F: Rundown with work in flight
//!
//! Run: RUST_LOG=aio_executor=debug ./target/release/aio-smoke

use aio_core::{AioCb, AioError, AioOp, CallerId, Errno, IoBuf, IoResult, JobRef, SigEvent, Signal};
use aio_executor::{AioConfig, BatchMode, CancelVerdict, Manager};
use aio_module::{FdFile, FileTable, MemDisk, MemFile, MemSocket, Notification, QueueNotifier};

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

const WAIT: Option<Duration> = Some(Duration::from_secs(5));

// ── Test harness ──

struct TestRunner {
    total: usize,
    passed: usize,
    failed: usize,
}

const LINE: &str = "────────────────────────────────────────────────────────────";

impl TestRunner {
    fn new() -> Self {
        Self { total: 0, passed: 0, failed: 0 }
    }

    fn section(&self, name: &str) {
        println!("\n{}", LINE);
        println!("  {}", name);
        println!("{}", LINE);
    }

    fn pass(&mut self, name: &str) {
        self.total += 1;
        self.passed += 1;
        println!("  [{:2}] {:<52} PASS", self.total, name);
    }

    fn fail(&mut self, name: &str, reason: &str) {
        self.total += 1;
        self.failed += 1;
        println!("  [{:2}] {:<52} FAIL: {}", self.total, name, reason);
    }

    fn check(&mut self, name: &str, ok: bool, reason: &str) {
        if ok { self.pass(name); } else { self.fail(name, reason); }
    }

    fn summary(&self) {
        println!("\n{}", LINE);
        println!(
            "  Total: {}  Passed: {}  Failed: {}",
            self.total, self.passed, self.failed
        );
        println!("{}", LINE);
    }
}

/// Helper: submit one control block and wait for its result.
fn run_one(mgr: &Manager, caller: CallerId, cb: &AioCb) -> Result<IoResult, AioError> {
    mgr.submit(caller, cb)?;
    mgr.suspend(caller, &[Some(cb.clone())], WAIT)?;
    mgr.reclaim(caller, cb)
}

/// Helper: poll until `f` holds, up to five seconds.
fn eventually(mut f: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !f() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(1));
    }
    true
}

// ════════════════════════════════════════════════════════════
// Part A: Worker path
// ════════════════════════════════════════════════════════════

fn test_worker(t: &mut TestRunner, mgr: &Manager) {
    t.section("Part A: Worker path (OS file)");
    let caller = CallerId(1);
    let path = std::env::temp_dir().join(format!("aio-smoke-{}.dat", std::process::id()));

    let file = match FdFile::open_rw(&path) {
        Ok(f) => { t.pass("open temp file"); f }
        Err(e) => {
            t.fail("open temp file", &e.to_string());
            return;
        }
    };
    let table = Arc::new(FileTable::new());
    let fd = table.install(Arc::new(file));
    let reg = mgr.register_caller(caller, table);
    t.check("register caller", reg.is_ok(), &format!("{:?}", reg));

    // A3: write then read back
    let payload: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
    let wr = AioOp::write(fd, IoBuf::from_vec(payload.clone()), 0).into_cb();
    let res = run_one(mgr, caller, &wr);
    t.check("write 4096 bytes", res == Ok(IoResult::ok(4096)), &format!("{:?}", res));
    t.check("job ref assigned", wr.job_ref() >= JobRef::FIRST, &format!("{}", wr.job_ref()));

    let rd = AioOp::read(fd, IoBuf::new(4096), 0).into_cb();
    let res = run_one(mgr, caller, &rd);
    t.check("read 4096 bytes", res == Ok(IoResult::ok(4096)), &format!("{:?}", res));
    t.check(
        "read matches written data",
        rd.op().buf.to_vec().ok() == Some(payload),
        "content mismatch",
    );

    // A5: past end of file
    let tail = AioOp::read(fd, IoBuf::new(512), 4000).into_cb();
    let res = run_one(mgr, caller, &tail);
    t.check("short read at EOF = 96", res == Ok(IoResult::ok(96)), &format!("{:?}", res));

    // A6: wait_any over several
    let mut ok = true;
    for i in 0..8i64 {
        let cb = AioOp::read(fd, IoBuf::new(256), i * 256).into_cb();
        ok &= mgr.submit(caller, &cb).is_ok();
    }
    let mut bytes = 0;
    for _ in 0..8 {
        match mgr.wait_any(caller, WAIT) {
            Ok(c) => bytes += c.result.status,
            Err(_) => ok = false,
        }
    }
    t.check("wait_any collects 8 x 256", ok && bytes == 2048, &format!("bytes={}", bytes));

    let usage = mgr.rusage(caller).unwrap_or_default();
    t.check(
        "block charges reach rusage",
        usage.in_blocks >= 10 && usage.out_blocks >= 1,
        &format!("{:?}", usage),
    );

    let sync = AioOp::read(fd, IoBuf::new(16), 0).into_cb();
    let res = mgr.read_sync(caller, &sync);
    t.check("read_sync inline", res == Ok(16), &format!("{:?}", res));

    let stats = mgr.caller_stats(caller).unwrap_or_default();
    t.check("no outstanding requests", stats == Default::default(), &format!("{:?}", stats));

    let _ = mgr.rundown(caller);
    let _ = std::fs::remove_file(&path);
}

// ════════════════════════════════════════════════════════════
// Part B: Batches
// ════════════════════════════════════════════════════════════

fn test_batch(t: &mut TestRunner, mgr: &Manager, notifier: &QueueNotifier) {
    t.section("Part B: Batches");
    let caller = CallerId(2);
    let table = Arc::new(FileTable::new());
    let file = Arc::new(MemFile::new(vec![0; 8192]));
    let fd = table.install(file.clone());
    let _ = mgr.register_caller(caller, table);

    let entries: Vec<Option<AioCb>> = (0..4i64)
        .map(|i| Some(AioOp::write(fd, IoBuf::from_vec(vec![i as u8 + 1; 1024]), i * 1024).into_cb()))
        .chain(std::iter::once(Some(AioOp::nop(fd).into_cb())))
        .collect();
    let out = mgr.submit_batch(caller, BatchMode::Wait, &entries, SigEvent::None);
    t.check(
        "wait batch: 4 writes + NoOp queued",
        out.as_ref().is_ok_and(|o| o.queued == 5 && o.failed == 0),
        &format!("{:?}", out),
    );
    let all_ok = entries
        .iter()
        .flatten()
        .take(4)
        .all(|cb| mgr.reclaim(caller, cb) == Ok(IoResult::ok(1024)));
    t.check("wait batch: every write reclaimed", all_ok, "reclaim mismatch");
    t.check(
        "wait batch: data landed",
        file.contents()[3072..4096].iter().all(|b| *b == 4),
        "content mismatch",
    );

    notifier.drain();
    let entries: Vec<Option<AioCb>> = (0..3i64)
        .map(|i| Some(AioOp::read(fd, IoBuf::new(512), i * 512).into_cb()))
        .collect();
    let out = mgr.submit_batch(caller, BatchMode::NoWait, &entries, SigEvent::Event { udata: 0xbeef });
    t.check("no-wait batch queued", out.is_ok(), &format!("{:?}", out));
    let notified = eventually(|| {
        notifier
            .drain()
            .iter()
            .any(|n| matches!(n, Notification::Event { job, udata: 0xbeef, .. } if *job == JobRef::NONE))
    });
    t.check("group notice after last member", notified, "no group event");
    for cb in entries.iter().flatten() {
        let _ = mgr.reclaim(caller, cb);
    }

    let bad = vec![Some(AioOp::read(aio_core::TargetId(77), IoBuf::new(8), 0).into_cb())];
    let out = mgr.submit_batch(caller, BatchMode::NoWait, &bad, SigEvent::None);
    t.check(
        "bad entry: EIO aggregate, EBADF in block",
        out.as_ref().is_ok_and(|o| o.error == Some(AioError::Os(Errno::EIO)))
            && bad[0].as_ref().and_then(|cb| cb.error()) == Some(Errno::EBADF),
        &format!("{:?}", out),
    );
    let _ = mgr.rundown(caller);
}

// ════════════════════════════════════════════════════════════
// Part C: Readiness path
// ════════════════════════════════════════════════════════════

fn test_readiness(t: &mut TestRunner, mgr: &Manager) {
    t.section("Part C: Readiness path (socket)");
    let caller = CallerId(3);
    let table = Arc::new(FileTable::new());
    let sock = Arc::new(MemSocket::new());
    let fd = table.install(sock.clone());
    let _ = mgr.register_caller(caller, table);

    let cb = AioOp::read(fd, IoBuf::new(5), 0).into_cb();
    let sub = mgr.submit(caller, &cb);
    let parked = mgr.caller_stats(caller).map(|s| s.readiness).unwrap_or(0);
    t.check("read parks until readable", sub.is_ok() && parked == 1, &format!("parked={}", parked));
    t.check(
        "poll_error = EINPROGRESS",
        mgr.poll_error(caller, &cb) == Ok(Some(Errno::EINPROGRESS)),
        "wrong state",
    );

    sock.feed(b"hello");
    let done = mgr.suspend(caller, &[Some(cb.clone())], WAIT);
    let res = mgr.reclaim(caller, &cb);
    t.check("promoted and completed", done.is_ok() && res == Ok(IoResult::ok(5)), &format!("{:?}", res));

    sock.close_peer();
    let wr = AioOp::write(fd, IoBuf::from_vec(b"x".to_vec()), 0)
        .sigevent(SigEvent::Signal(Signal::SIGUSR1))
        .into_cb();
    let res = run_one(mgr, caller, &wr);
    t.check("write to closed peer = EPIPE", res == Ok(IoResult::failed(Errno::EPIPE)), &format!("{:?}", res));
    let _ = mgr.rundown(caller);
}

// ════════════════════════════════════════════════════════════
// Part D: Direct path
// ════════════════════════════════════════════════════════════

fn test_direct(t: &mut TestRunner, mgr: &Manager) {
    t.section("Part D: Direct path (block device)");
    let caller = CallerId(4);
    let table = Arc::new(FileTable::new());
    let disk = Arc::new(MemDisk::new(512, 16));
    let fd = table.install(disk.clone());
    let _ = mgr.register_caller(caller, table);

    disk.hold();
    let wr = AioOp::write(fd, IoBuf::from_vec(vec![0xd1; 1024]), 512).into_cb();
    let sub = mgr.submit(caller, &wr);
    let in_flight = mgr.stats().buffers;
    t.check("aligned write goes direct", sub.is_ok() && disk.accepted() == 1, &format!("{:?}", sub));
    t.check("buffer counted while in flight", in_flight == 1, &format!("buffers={}", in_flight));
    t.check(
        "in-flight direct I/O not cancelable",
        mgr.cancel(caller, fd, Some(&wr)) == Ok(CancelVerdict::NotCanceled),
        "cancel succeeded",
    );
    disk.release();
    let done = mgr.suspend(caller, &[Some(wr.clone())], WAIT);
    let res = mgr.reclaim(caller, &wr);
    t.check("direct write completes", done.is_ok() && res == Ok(IoResult::ok(1024)), &format!("{:?}", res));
    t.check("disk holds the data", disk.contents()[512..1536].iter().all(|b| *b == 0xd1), "content mismatch");

    let odd = AioOp::read(fd, IoBuf::new(100), 0).into_cb();
    let res = run_one(mgr, caller, &odd);
    t.check(
        "unaligned read falls back to worker",
        res == Ok(IoResult::ok(100)) && disk.accepted() == 1,
        &format!("{:?}", res),
    );

    disk.fail_next(Errno::EIO);
    let bad = AioOp::read(fd, IoBuf::new(512), 0).into_cb();
    let sub = mgr.submit(caller, &bad);
    let res = mgr.reclaim(caller, &bad);
    t.check(
        "strategy error finishes immediately",
        sub.is_ok() && res == Ok(IoResult::failed(Errno::EIO)),
        &format!("{:?}", res),
    );
    let _ = mgr.rundown(caller);

    #[cfg(target_os = "linux")]
    test_uring(t, mgr);
}

#[cfg(target_os = "linux")]
fn test_uring(t: &mut TestRunner, mgr: &Manager) {
    use aio_module::UringDisk;

    let caller = CallerId(5);
    let path = std::env::temp_dir().join(format!("aio-smoke-disk-{}.img", std::process::id()));
    if let Err(e) = std::fs::write(&path, vec![0u8; 64 * 1024]) {
        t.fail("create disk image", &e.to_string());
        return;
    }
    let disk = match UringDisk::open(&path, 4096, 32) {
        Ok(d) => { t.pass("io_uring disk opened"); d }
        Err(e) => {
            t.fail("io_uring disk opened", &format!("{} (io_uring disabled?)", e));
            let _ = std::fs::remove_file(&path);
            return;
        }
    };
    let table = Arc::new(FileTable::new());
    let fd = table.install(Arc::new(disk));
    let _ = mgr.register_caller(caller, table);

    let wr = AioOp::write(fd, IoBuf::from_vec(vec![0x7e; 8192]), 4096).into_cb();
    let res = run_one(mgr, caller, &wr);
    t.check("io_uring direct write 8 KiB", res == Ok(IoResult::ok(8192)), &format!("{:?}", res));
    let rd = AioOp::read(fd, IoBuf::new(4096), 8192).into_cb();
    let res = run_one(mgr, caller, &rd);
    t.check(
        "io_uring direct read back",
        res == Ok(IoResult::ok(4096)) && rd.op().buf.to_vec().is_ok_and(|b| b.iter().all(|x| *x == 0x7e)),
        &format!("{:?}", res),
    );
    let _ = mgr.rundown(caller);
    let _ = std::fs::remove_file(&path);
}

// ════════════════════════════════════════════════════════════
// Part E: Cancel, timeouts, interrupts
// ════════════════════════════════════════════════════════════

fn test_cancel(t: &mut TestRunner, mgr: &Arc<Manager>) {
    t.section("Part E: Cancel, timeouts and interrupts");
    let caller = CallerId(6);
    let table = Arc::new(FileTable::new());
    let sock = Arc::new(MemSocket::new());
    let fd = table.install(sock.clone());
    let _ = mgr.register_caller(caller, table);

    let cb = AioOp::read(fd, IoBuf::new(8), 0).into_cb();
    let _ = mgr.submit(caller, &cb);
    let res = mgr.suspend(caller, &[Some(cb.clone())], Some(Duration::from_millis(20)));
    t.check("suspend times out with EAGAIN", res == Err(AioError::Again), &format!("{:?}", res));

    let waiter = {
        let mgr = Arc::clone(mgr);
        let cb = cb.clone();
        thread::spawn(move || mgr.suspend(caller, &[Some(cb)], None))
    };
    thread::sleep(Duration::from_millis(20));
    let _ = mgr.interrupt(caller);
    let res = waiter.join().unwrap_or(Err(AioError::Invalid));
    t.check("interrupt breaks suspend with EINTR", res == Err(AioError::Interrupted), &format!("{:?}", res));

    let verdict = mgr.cancel(caller, fd, None);
    t.check("parked read is canceled", verdict == Ok(CancelVerdict::Canceled), &format!("{:?}", verdict));
    let res = mgr.reclaim(caller, &cb);
    t.check("result is ECANCELED", res == Ok(IoResult::failed(Errno::ECANCELED)), &format!("{:?}", res));
    let verdict = mgr.cancel(caller, fd, None);
    t.check("nothing left: AllDone", verdict == Ok(CancelVerdict::AllDone), &format!("{:?}", verdict));
    let _ = mgr.rundown(caller);
}

// ════════════════════════════════════════════════════════════
// Part F: Rundown
// ════════════════════════════════════════════════════════════

fn test_rundown(t: &mut TestRunner, mgr: &Arc<Manager>) {
    t.section("Part F: Rundown with work in flight");
    let caller = CallerId(7);
    let table = Arc::new(FileTable::new());
    let file = Arc::new(MemFile::new(vec![1; 4096]));
    let sock = Arc::new(MemSocket::new());
    let f = table.install(file.clone());
    let s = table.install(sock.clone());
    let _ = mgr.register_caller(caller, table);

    file.hold();
    for i in 0..4i64 {
        let _ = mgr.submit(caller, &AioOp::read(f, IoBuf::new(64), i * 64).into_cb());
    }
    let _ = mgr.submit(caller, &AioOp::read(s, IoBuf::new(8), 0).into_cb());
    t.check("requests running", file.wait_started(1, Duration::from_secs(5)), "no worker started");

    let teardown = {
        let mgr = Arc::clone(mgr);
        thread::spawn(move || mgr.rundown(caller))
    };
    thread::sleep(Duration::from_millis(20));
    t.check("rundown waits for running work", !teardown.is_finished(), "returned early");
    file.release();
    let res = teardown.join().unwrap_or(Err(AioError::Invalid));
    t.check("rundown completes", res.is_ok(), &format!("{:?}", res));
    t.check(
        "caller forgotten",
        mgr.caller_stats(caller) == Err(AioError::NoCaller),
        "caller still registered",
    );
    let stats = mgr.stats();
    t.check(
        "global counters back to zero",
        stats.queued == 0 && stats.buffers == 0 && stats.global_queue == 0,
        &format!("{:?}", stats),
    );
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== AIO End-to-End Smoke Test ===");

    let mut t = TestRunner::new();
    let notifier = Arc::new(QueueNotifier::new());
    let mgr = match Manager::builder()
        .config(AioConfig::from_env())
        .notifier(notifier.clone())
        .build()
    {
        Ok(m) => Arc::new(m),
        Err(e) => {
            println!("\nFATAL: ManagerBuilder failed: {}", e);
            t.summary();
            std::process::exit(1);
        }
    };

    test_worker(&mut t, &mgr);
    test_batch(&mut t, &mgr, &notifier);
    test_readiness(&mut t, &mgr);
    test_direct(&mut t, &mgr);
    test_cancel(&mut t, &mgr);
    test_rundown(&mut t, &mgr);

    let stats = mgr.stats();
    println!("\n    workers: {} (idle {})", stats.workers, stats.idle_workers);
    mgr.shutdown();

    t.summary();
    std::process::exit(if t.failed > 0 { 1 } else { 0 });
}
