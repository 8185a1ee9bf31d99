//! End-to-end tests driving the real initializer/producer/consumer/finalizer
//! code paths, one process but with producer and consumer workers forked as
//! real child processes, exactly as the launchers do.
//!
//! Only one test in this binary exercises [`ringmask::finalizer::run`],
//! because it installs a process-wide `SIGINT` handler via `ctrlc` and that
//! can only be done once per process; every other scenario drives the same
//! shutdown protocol directly against the header and semaphores.

use std::fs::File;
use std::io::Write;
use std::os::fd::{ AsRawFd, FromRawFd, IntoRawFd };
use std::path::{ Path, PathBuf };
use std::sync::atomic::{ AtomicU32, Ordering };

use ringmask::config::{ InitConfig, LaunchConfig, Mode };
use ringmask::naming::Names;
use ringmask::region::SharedRegion;
use ringmask::sync::{ ControlGuard, SyncObjects };

static TEST_SEQ: AtomicU32 = AtomicU32::new(0);

fn unique_base(tag: &str) -> String {
    let seq = TEST_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("ringmask-it-{tag}-{}-{seq}", std::process::id())
}

fn write_temp_file(contents: &[u8]) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "ringmask-it-src-{}-{}.bin",
        std::process::id(),
        TEST_SEQ.fetch_add(1, Ordering::Relaxed)
    ));
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(contents).unwrap();
    path
}

/// Bring resources up with the same steps `ringmask-init` performs.
fn init_pipeline(base: &str, capacity: usize, mask: u8, source: &Path) {
    let config = InitConfig::new(
        base.to_string(),
        capacity as i64,
        mask as i64,
        source.to_path_buf()
    ).unwrap();
    ringmask::init::run(&config).unwrap();
}

/// Drive the drain protocol directly (flag, broadcast, wait for last leaver),
/// without going through [`ringmask::finalizer::run`]'s signal handling.
fn drain_and_destroy(base: &str) -> ringmask::region::Snapshot {
    let names = Names::derive(base).unwrap();
    let mut region = SharedRegion::open(&names).unwrap();
    let sync = SyncObjects::open(&names).unwrap();

    let total_workers = {
        let _guard = ControlGuard::acquire(&sync.control).unwrap();
        region.header_mut().set_shutdown();
        region.header().total_workers()
    };
    for _ in 0..total_workers {
        sync.empty.post().unwrap();
        sync.full.post().unwrap();
    }
    sync.done.wait().unwrap();

    let snapshot = {
        let _guard = ControlGuard::acquire(&sync.control).unwrap();
        region.header().snapshot()
    };

    drop(region);
    SyncObjects::unlink_all(&names);
    SharedRegion::unlink(&names);
    snapshot
}

fn masked_expected(source: &[u8], mask: u8) -> Vec<u8> {
    source
        .iter()
        .copied()
        .filter(|&b| b != 0x0a && b != 0x0d)
        .map(|b| (b ^ mask) ^ mask)
        .collect()
}

#[test]
fn pipeline_round_trips_source_bytes_through_mask() {
    let base = unique_base("roundtrip");
    let source_bytes = b"the quick brown fox\njumps over\r\nthe lazy dog".to_vec();
    let source_path = write_temp_file(&source_bytes);
    let output_path = std::env::temp_dir().join(format!("{base}-out.bin"));

    init_pipeline(&base, 4, 0x5a, &source_path);

    let producer_config = LaunchConfig::new(base.clone(), Mode::Automatic, 2).unwrap();
    let consumer_config = LaunchConfig::new(base.clone(), Mode::Automatic, 2).unwrap();
    let consumer_output = output_path.clone();

    let consumer_handle = std::thread::spawn(move || {
        ringmask::consumer::run_launcher(&consumer_config, &consumer_output).unwrap();
    });
    // Give the consumer workers a moment to register before the producers
    // start draining the source, matching how the two launchers are started
    // independently in practice.
    std::thread::sleep(std::time::Duration::from_millis(20));

    let producer_handle = std::thread::spawn(move || {
        ringmask::producer::run_launcher(&producer_config).unwrap();
    });
    producer_handle.join().unwrap();

    let snapshot = drain_and_destroy(&base);
    consumer_handle.join().unwrap();

    let expected = masked_expected(&source_bytes, 0x5a);
    assert_eq!(snapshot.total_produced, expected.len() as u64);
    assert_eq!(snapshot.total_consumed, expected.len() as u64);
    assert_eq!(snapshot.producers_active, 0);
    assert_eq!(snapshot.consumers_active, 0);

    let output = std::fs::read(&output_path).unwrap();
    assert_eq!(output, expected);

    let _ = std::fs::remove_file(&source_path);
    let _ = std::fs::remove_file(&output_path);
}

#[test]
fn capacity_one_boundary_still_drains_every_byte() {
    let base = unique_base("cap1");
    let source_bytes = b"abcdefgh".to_vec();
    let source_path = write_temp_file(&source_bytes);
    let output_path = std::env::temp_dir().join(format!("{base}-out.bin"));

    init_pipeline(&base, 1, 0x00, &source_path);

    let producer_config = LaunchConfig::new(base.clone(), Mode::Automatic, 1).unwrap();
    let consumer_config = LaunchConfig::new(base.clone(), Mode::Automatic, 1).unwrap();
    let consumer_output = output_path.clone();

    let consumer_handle = std::thread::spawn(move || {
        ringmask::consumer::run_launcher(&consumer_config, &consumer_output).unwrap();
    });
    std::thread::sleep(std::time::Duration::from_millis(20));

    ringmask::producer::run_launcher(&producer_config).unwrap();

    let snapshot = drain_and_destroy(&base);
    consumer_handle.join().unwrap();

    assert_eq!(snapshot.total_produced, source_bytes.len() as u64);
    assert_eq!(snapshot.total_consumed, source_bytes.len() as u64);

    let output = std::fs::read(&output_path).unwrap();
    assert_eq!(output, source_bytes);

    let _ = std::fs::remove_file(&source_path);
    let _ = std::fs::remove_file(&output_path);
}

#[test]
fn more_producers_than_capacity_drains_to_eof_without_finalizer() {
    // Regression for the ticket-ordering deadlock: with capacity < producer
    // count, a producer whose turn isn't due yet must not be able to steal
    // an `empty` credit ahead of the producer that owns the next turn, or
    // the rightful ticket holder starves forever (no finalizer runs in this
    // scenario to rescue it with a broadcast post).
    let base = unique_base("s3");
    let source_bytes = b"abcdefghij".to_vec();
    let source_path = write_temp_file(&source_bytes);
    let output_path = std::env::temp_dir().join(format!("{base}-out.bin"));

    init_pipeline(&base, 2, 0xff, &source_path);

    let producer_config = LaunchConfig::new(base.clone(), Mode::Automatic, 4).unwrap();
    let consumer_config = LaunchConfig::new(base.clone(), Mode::Automatic, 4).unwrap();
    let consumer_output = output_path.clone();

    let consumer_handle = std::thread::spawn(move || {
        ringmask::consumer::run_launcher(&consumer_config, &consumer_output).unwrap();
    });
    std::thread::sleep(std::time::Duration::from_millis(20));

    ringmask::producer::run_launcher(&producer_config).unwrap();

    let snapshot = drain_and_destroy(&base);
    consumer_handle.join().unwrap();

    assert_eq!(snapshot.total_produced, source_bytes.len() as u64);
    assert_eq!(snapshot.total_consumed, source_bytes.len() as u64);

    let output = std::fs::read(&output_path).unwrap();
    assert_eq!(output, source_bytes);

    let _ = std::fs::remove_file(&source_path);
    let _ = std::fs::remove_file(&output_path);
}

#[test]
fn shutdown_flag_is_idempotent_and_in_flight_never_goes_negative() {
    let base = unique_base("idempotent");
    let source_bytes = b"xy".to_vec();
    let source_path = write_temp_file(&source_bytes);

    init_pipeline(&base, 4, 0x11, &source_path);

    let names = Names::derive(&base).unwrap();
    let mut region = SharedRegion::open(&names).unwrap();
    let sync = SyncObjects::open(&names).unwrap();

    {
        let _guard = ControlGuard::acquire(&sync.control).unwrap();
        region.header_mut().set_shutdown();
        region.header_mut().set_shutdown();
        assert!(region.header().shutdown_flag());
    }

    region.header().check_invariants().unwrap();

    drop(region);
    SyncObjects::unlink_all(&names);
    SharedRegion::unlink(&names);
    let _ = std::fs::remove_file(&source_path);
}

fn total_consumed(base: &str) -> u64 {
    let names = Names::derive(base).unwrap();
    let region = SharedRegion::open(&names).unwrap();
    let sync = SyncObjects::open(&names).unwrap();
    let _guard = ControlGuard::acquire(&sync.control).unwrap();
    region.header().snapshot().total_consumed
}

/// Shutdown triggered mid-stream, with an input longer than the ring
/// capacity and producers still actively working: the finalizer must still
/// terminate cleanly, every worker must have left, and the named objects
/// must be unlinked so a fresh initializer can reuse the same base name
/// without manual cleanup.
#[test]
fn mid_stream_shutdown_drains_cleanly_and_frees_the_name_for_reuse() {
    let base = unique_base("midstream");
    let source_bytes = b"the quick brown fox jumps over the lazy dog repeatedly".repeat(4);
    let source_path = write_temp_file(&source_bytes);
    let output_path = std::env::temp_dir().join(format!("{base}-out.bin"));

    init_pipeline(&base, 8, 0x00, &source_path);

    let producer_config = LaunchConfig::new(base.clone(), Mode::Automatic, 2).unwrap();
    let consumer_config = LaunchConfig::new(base.clone(), Mode::Automatic, 1).unwrap();
    let consumer_output = output_path.clone();

    let consumer_handle = std::thread::spawn(move || {
        let _ = ringmask::consumer::run_launcher(&consumer_config, &consumer_output);
    });
    let producer_handle = std::thread::spawn(move || {
        let _ = ringmask::producer::run_launcher(&producer_config);
    });

    while total_consumed(&base) < 3 {
        std::thread::sleep(std::time::Duration::from_millis(1));
    }

    let snapshot = drain_and_destroy(&base);
    producer_handle.join().unwrap();
    consumer_handle.join().unwrap();

    assert_eq!(snapshot.producers_active, 0);
    assert_eq!(snapshot.consumers_active, 0);
    assert!(snapshot.total_consumed <= snapshot.total_produced);
    assert!(snapshot.total_consumed >= 3);
    assert!((snapshot.total_produced as usize) < source_bytes.len());

    // The base name must be immediately reusable: a fresh initializer
    // succeeds without any manual cleanup.
    init_pipeline(&base, 8, 0x00, &source_path);
    let names = Names::derive(&base).unwrap();
    SyncObjects::unlink_all(&names);
    SharedRegion::unlink(&names);

    let _ = std::fs::remove_file(&source_path);
    let _ = std::fs::remove_file(&output_path);
}

/// Manual mode: each worker blocks on a line of input before every
/// produce/consume step. Feeds one line per byte on each side through a
/// pipe dup2'd onto the process's stdin, which the forked workers inherit.
#[test]
fn manual_mode_steps_one_byte_per_line_of_input() {
    let base = unique_base("manual");
    let source_bytes = b"ZZ".to_vec();
    let source_path = write_temp_file(&source_bytes);
    let output_path = std::env::temp_dir().join(format!("{base}-out.bin"));

    init_pipeline(&base, 8, 0x01, &source_path);

    let (read_end, write_end) = nix::unistd::pipe().unwrap();
    let saved_stdin = unsafe { libc::dup(0) };
    assert!(saved_stdin >= 0);
    let rc = unsafe { libc::dup2(read_end.as_raw_fd(), 0) };
    assert_eq!(rc, 0);
    drop(read_end);

    let mut writer = unsafe { File::from_raw_fd(write_end.into_raw_fd()) };
    // Two prompts on the producer side (one per byte), two on the consumer
    // side.
    writer.write_all(b"\n\n\n\n").unwrap();
    drop(writer);

    let producer_config = LaunchConfig::new(base.clone(), Mode::Manual, 1).unwrap();
    let consumer_config = LaunchConfig::new(base.clone(), Mode::Manual, 1).unwrap();
    let consumer_output = output_path.clone();

    let consumer_handle = std::thread::spawn(move || {
        ringmask::consumer::run_launcher(&consumer_config, &consumer_output).unwrap();
    });
    std::thread::sleep(std::time::Duration::from_millis(20));
    ringmask::producer::run_launcher(&producer_config).unwrap();

    let snapshot = drain_and_destroy(&base);
    consumer_handle.join().unwrap();

    unsafe {
        libc::dup2(saved_stdin, 0);
        libc::close(saved_stdin);
    }

    assert_eq!(snapshot.total_produced, 2);
    assert_eq!(snapshot.total_consumed, 2);

    let output = std::fs::read(&output_path).unwrap();
    assert_eq!(output, source_bytes);

    let _ = std::fs::remove_file(&source_path);
    let _ = std::fs::remove_file(&output_path);
}

/// The only test in this binary that exercises the real `SIGINT`-driven
/// finalizer; `ctrlc::set_handler` may be installed exactly once per
/// process.
#[test]
fn finalizer_drains_on_real_interrupt_and_reports_final_counts() {
    let base = unique_base("sigint");
    let source_bytes = b"finalizer integration payload".to_vec();
    let source_path = write_temp_file(&source_bytes);
    let output_path = std::env::temp_dir().join(format!("{base}-out.bin"));

    init_pipeline(&base, 4, 0x2a, &source_path);

    let producer_config = LaunchConfig::new(base.clone(), Mode::Automatic, 2).unwrap();
    let consumer_config = LaunchConfig::new(base.clone(), Mode::Automatic, 2).unwrap();
    let consumer_output = output_path.clone();

    let consumer_handle = std::thread::spawn(move || {
        ringmask::consumer::run_launcher(&consumer_config, &consumer_output).unwrap();
    });
    std::thread::sleep(std::time::Duration::from_millis(20));

    let producer_handle = std::thread::spawn(move || {
        ringmask::producer::run_launcher(&producer_config).unwrap();
    });
    producer_handle.join().unwrap();

    let finalizer_base = base.clone();
    let finalizer_handle = std::thread::spawn(move || { ringmask::finalizer::run(&finalizer_base) });

    // Give the finalizer time to install its handler and block, then raise
    // the same signal it waits for in production.
    std::thread::sleep(std::time::Duration::from_millis(50));
    unsafe {
        libc::raise(libc::SIGINT);
    }

    let report = finalizer_handle.join().unwrap().unwrap();
    consumer_handle.join().unwrap();

    let expected = masked_expected(&source_bytes, 0x2a);
    assert_eq!(report.snapshot.total_produced, expected.len() as u64);
    assert_eq!(report.snapshot.total_consumed, expected.len() as u64);
    assert_eq!(report.snapshot.producers_active, 0);
    assert_eq!(report.snapshot.consumers_active, 0);

    let output = std::fs::read(&output_path).unwrap();
    assert_eq!(output, expected);

    let _ = std::fs::remove_file(&source_path);
    let _ = std::fs::remove_file(&output_path);
}
