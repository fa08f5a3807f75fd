//! End-to-end exercises of the system-call surface.
//!
//! Each test plays the part of the WebAssembly engine: it lays arguments out
//! in a byte-buffer "linear memory", funnels calls through
//! `Bindings::dispatch` exactly as a trapped import would, and checks both
//! the returned `errno` and the effects on the backing store.
//!
//! ## Authors
//!
//! The WASI Sandbox Development Team.
//!
//! ## Licensing and copyright notice
//!
//! See the `LICENSE_MIT.markdown` file in the WASI Sandbox root directory for
//! information on licensing and copyright.

use std::sync::Arc;
use std::time::{Duration, Instant};
use wasi_sandbox::abi::{MemoryHandler, VecMemory, WasmValue};
use wasi_sandbox::storage::memory::MemoryDir;
use wasi_sandbox::storage::{DirHandle, FileHandle, Snapshot};
use wasi_sandbox::stream::{ByteSource, SharedSink};
use wasi_sandbox::types::ErrNo;
use wasi_sandbox::{run_status, Bindings, CancelToken, Config, FatalError, WasiApiName};

// Scratch layout used by the tests: paths at 0, iovecs at 128, data at 256,
// results at 512, readdir buffers at 640.
const PATH_AT: u32 = 0;
const IOVS_AT: u32 = 128;
const DATA_AT: u32 = 256;
const RESULT_AT: u32 = 512;
const BUF_AT: u32 = 640;

struct Harness {
    bindings: Bindings,
    memory: VecMemory,
    root: MemoryDir,
    stdout: SharedSink,
}

fn harness_with(preopens: Vec<(String, Arc<MemoryDir>)>, stdin: &[u8]) -> Harness {
    let root = MemoryDir::new();
    let stdout = SharedSink::new();
    let mut mounts: Vec<(String, Arc<dyn wasi_sandbox::storage::DirHandle>)> = vec![(
        String::from("/sandbox"),
        Arc::new(root.clone()) as Arc<dyn wasi_sandbox::storage::DirHandle>,
    )];
    for (mount, dir) in preopens {
        mounts.push((mount, dir as Arc<dyn wasi_sandbox::storage::DirHandle>));
    }
    let config = Config {
        preopens: mounts,
        stdin: Box::new(ByteSource::new(stdin.to_vec())),
        stdout: Box::new(stdout.clone()),
        stderr: Box::new(SharedSink::new()),
        program_name: String::from("wc"),
        arguments: vec![
            String::from("foo"),
            String::from("-bar"),
            String::from("--baz=value"),
        ],
        environment: vec![(String::from("LANG"), String::from("C"))],
        enable_strace: false,
        cancel: None,
    };
    Harness {
        bindings: Bindings::new(config),
        memory: VecMemory::new(64 * 1024),
        root,
        stdout,
    }
}

fn harness() -> Harness {
    harness_with(vec![], b"")
}

impl Harness {
    async fn call(&mut self, name: WasiApiName, args: &[WasmValue]) -> ErrNo {
        self.bindings
            .dispatch(name, &mut self.memory, args)
            .await
            .expect("no fatal error expected")
    }

    fn store_path(&mut self, path: &str) -> (u32, u32) {
        self.memory
            .write_buffer(PATH_AT, path.as_bytes())
            .expect("path fits");
        (PATH_AT, path.len() as u32)
    }

    async fn path_open(&mut self, path: &str, oflags: u16) -> Result<u32, ErrNo> {
        let (path_at, path_len) = self.store_path(path);
        let errno = self
            .call(
                WasiApiName::PATH_OPEN,
                &[
                    WasmValue::I32(3),
                    WasmValue::I32(0),
                    WasmValue::I32(path_at as i32),
                    WasmValue::I32(path_len as i32),
                    WasmValue::I32(oflags as i32),
                    WasmValue::I64(0),
                    WasmValue::I64(0),
                    WasmValue::I32(0),
                    WasmValue::I32(RESULT_AT as i32),
                ],
            )
            .await;
        if errno != ErrNo::Success {
            return Err(errno);
        }
        Ok(self.memory.read_u32(RESULT_AT).expect("fd written"))
    }

    fn store_iovec(&mut self, buf: u32, len: u32) {
        self.memory.write_u32(IOVS_AT, buf).expect("iovec buf");
        self.memory.write_u32(IOVS_AT + 4, len).expect("iovec len");
    }

    async fn fd_write(&mut self, fd: u32, bytes: &[u8]) -> (ErrNo, u32) {
        self.memory.write_buffer(DATA_AT, bytes).expect("data fits");
        self.store_iovec(DATA_AT, bytes.len() as u32);
        let errno = self
            .call(
                WasiApiName::FD_WRITE,
                &[
                    WasmValue::I32(fd as i32),
                    WasmValue::I32(IOVS_AT as i32),
                    WasmValue::I32(1),
                    WasmValue::I32(RESULT_AT as i32),
                ],
            )
            .await;
        (errno, self.memory.read_u32(RESULT_AT).unwrap_or(0))
    }

    async fn fd_read(&mut self, fd: u32, max: u32) -> (ErrNo, Vec<u8>) {
        self.store_iovec(BUF_AT, max);
        let errno = self
            .call(
                WasiApiName::FD_READ,
                &[
                    WasmValue::I32(fd as i32),
                    WasmValue::I32(IOVS_AT as i32),
                    WasmValue::I32(1),
                    WasmValue::I32(RESULT_AT as i32),
                ],
            )
            .await;
        let nread = self.memory.read_u32(RESULT_AT).unwrap_or(0);
        let bytes = self.memory.read_buffer(BUF_AT, nread).unwrap_or_default();
        (errno, bytes)
    }

    async fn fd_close(&mut self, fd: u32) -> ErrNo {
        self.call(WasiApiName::FD_CLOSE, &[WasmValue::I32(fd as i32)])
            .await
    }

    async fn fd_readdir(&mut self, fd: u32, buf_len: u32, cookie: u64) -> (ErrNo, u32, Vec<u8>) {
        let errno = self
            .call(
                WasiApiName::FD_READDIR,
                &[
                    WasmValue::I32(fd as i32),
                    WasmValue::I32(BUF_AT as i32),
                    WasmValue::I32(buf_len as i32),
                    WasmValue::I64(cookie as i64),
                    WasmValue::I32(RESULT_AT as i32),
                ],
            )
            .await;
        let used = self.memory.read_u32(RESULT_AT).unwrap_or(0);
        let bytes = self.memory.read_buffer(BUF_AT, used).unwrap_or_default();
        (errno, used, bytes)
    }

    async fn file_contents(&self, name: &str) -> Vec<u8> {
        let file = self
            .root
            .open_file(name, false)
            .await
            .expect("file exists in the backing store");
        let snapshot = file.snapshot().await.expect("snapshot");
        snapshot
            .read_at(0, snapshot.size() as usize)
            .await
            .expect("contents")
    }
}

const OFLAG_CREATE: u16 = 1;
const OFLAG_EXCL: u16 = 1 << 2;

#[tokio::test]
async fn hello_write_creates_the_file_with_its_contents() {
    let mut harness = harness();
    let fd = harness
        .path_open("/sandbox/hello.txt", OFLAG_CREATE)
        .await
        .expect("open succeeds");
    assert_eq!(fd, 4, "first descriptor after the single preopen");
    let (errno, written) = harness.fd_write(fd, b"hi").await;
    assert_eq!(errno, ErrNo::Success);
    assert_eq!(written, 2);
    assert_eq!(harness.fd_close(fd).await, ErrNo::Success);
    assert_eq!(harness.file_contents("hello.txt").await, b"hi");
}

#[tokio::test]
async fn read_back_returns_the_exact_file_contents() {
    let mut harness = harness();
    harness
        .root
        .install_file("input.txt", b"hello from input.txt\n");
    let fd = harness
        .path_open("/sandbox/input.txt", 0)
        .await
        .expect("open succeeds");
    let (errno, bytes) = harness.fd_read(fd, 4096).await;
    assert_eq!(errno, ErrNo::Success);
    assert_eq!(bytes.len(), 21);
    assert_eq!(bytes, b"hello from input.txt\n");
}

#[tokio::test]
async fn directory_listing_resumes_across_cookie_values() {
    let mut harness = harness();
    harness.root.install_file("a", b"");
    harness.root.install_file("b", b"");
    harness.root.install_file("c", b"");

    // A 32-byte buffer holds exactly one header (24 bytes) plus a one-byte
    // name; the second entry must wait for the next call.
    let mut names = Vec::new();
    for cookie in 0..3u64 {
        let (errno, used, bytes) = harness.fd_readdir(3, 32, cookie).await;
        assert_eq!(errno, ErrNo::Success);
        assert_eq!(used, 25);
        assert_eq!(u64::from_le_bytes(bytes[0..8].try_into().unwrap()), cookie + 1);
        assert_eq!(u64::from_le_bytes(bytes[8..16].try_into().unwrap()), 0);
        assert_eq!(u32::from_le_bytes(bytes[16..20].try_into().unwrap()), 1);
        names.push(bytes[24]);
    }
    assert_eq!(names, vec![b'a', b'b', b'c']);

    let (errno, used, _) = harness.fd_readdir(3, 32, 3).await;
    assert_eq!(errno, ErrNo::Success);
    assert_eq!(used, 0, "the listing is exhausted");
}

#[tokio::test]
async fn a_buffer_too_small_for_one_entry_writes_nothing() {
    let mut harness = harness();
    harness.root.install_file("name", b"");
    let (errno, used, _) = harness.fd_readdir(3, 16, 0).await;
    assert_eq!(errno, ErrNo::Success);
    assert_eq!(used, 0);
    // The parked entry is not lost: a big enough buffer picks it up.
    let (errno, used, bytes) = harness.fd_readdir(3, 64, 0).await;
    assert_eq!(errno, ErrNo::Success);
    assert_eq!(used, 28);
    assert_eq!(&bytes[24..28], b"name");
}

#[tokio::test]
async fn escaping_the_preopen_root_is_denied() {
    let mut harness = harness();
    let (path_at, path_len) = harness.store_path("../etc/passwd");
    let errno = harness
        .call(
            WasiApiName::PATH_FILESTAT_GET,
            &[
                WasmValue::I32(3),
                WasmValue::I32(0),
                WasmValue::I32(path_at as i32),
                WasmValue::I32(path_len as i32),
                WasmValue::I32(RESULT_AT as i32),
            ],
        )
        .await;
    assert_eq!(errno, ErrNo::NotCapable);

    let errno = harness.path_open("../escape", OFLAG_CREATE).await.err();
    assert_eq!(errno, Some(ErrNo::NotCapable));
}

#[tokio::test]
async fn proc_exit_unwinds_with_the_exit_code() {
    let mut harness = harness();
    let result = harness
        .bindings
        .dispatch(
            WasiApiName::PROC_EXIT,
            &mut harness.memory,
            &[WasmValue::I32(120)],
        )
        .await
        .map(|_| ());
    assert_eq!(result, Err(FatalError::Exit(120)));
    assert_eq!(harness.bindings.exit_code(), Some(120));
    assert_eq!(run_status(result).unwrap(), 120);
}

#[tokio::test]
async fn a_relative_clock_subscription_sleeps_and_fires() {
    let mut harness = harness();
    // subscription: userdata, tag = clock, monotonic id, 50 ms relative
    // timeout, zero precision.
    harness.memory.write_u64(0, 0x99).unwrap();
    harness.memory.write_buffer(8, &[0]).unwrap();
    harness.memory.write_u32(16, 1).unwrap();
    harness.memory.write_u64(24, 50_000_000).unwrap();
    harness.memory.write_u64(32, 0).unwrap();
    harness.memory.write_u16(40, 0).unwrap();

    let started = Instant::now();
    let errno = harness
        .call(
            WasiApiName::POLL_ONEOFF,
            &[
                WasmValue::I32(0),
                WasmValue::I32(64),
                WasmValue::I32(1),
                WasmValue::I32(RESULT_AT as i32),
            ],
        )
        .await;
    let elapsed = started.elapsed();
    assert_eq!(errno, ErrNo::Success);
    assert!(elapsed >= Duration::from_millis(45), "slept {:?}", elapsed);
    assert_eq!(harness.memory.read_u32(RESULT_AT).unwrap(), 1);
    // The event echoes the userdata, reports success, and is a clock event.
    assert_eq!(harness.memory.read_u64(64).unwrap(), 0x99);
    assert_eq!(harness.memory.read_u16(72).unwrap(), 0);
    assert_eq!(harness.memory.read_buffer(74, 1).unwrap()[0], 0);
}

#[tokio::test]
async fn an_absolute_timeout_on_an_unsupported_clock_reports_nosys() {
    let mut harness = harness();
    // subscription: userdata, tag = clock, process-cputime id, an
    // epoch-scale absolute timeout, ABSTIME set.
    harness.memory.write_u64(0, 0x42).unwrap();
    harness.memory.write_buffer(8, &[0]).unwrap();
    harness.memory.write_u32(16, 2).unwrap();
    harness.memory.write_u64(24, u64::MAX / 2).unwrap();
    harness.memory.write_u64(32, 0).unwrap();
    harness.memory.write_u16(40, 1).unwrap();

    let started = Instant::now();
    let errno = harness
        .call(
            WasiApiName::POLL_ONEOFF,
            &[
                WasmValue::I32(0),
                WasmValue::I32(64),
                WasmValue::I32(1),
                WasmValue::I32(RESULT_AT as i32),
            ],
        )
        .await;
    assert_eq!(errno, ErrNo::Success);
    assert!(started.elapsed() < Duration::from_millis(20), "no sleep");
    assert_eq!(harness.memory.read_u32(RESULT_AT).unwrap(), 1);
    assert_eq!(harness.memory.read_u64(64).unwrap(), 0x42);
    assert_eq!(harness.memory.read_u16(72).unwrap(), 52, "NoSys");
    assert_eq!(harness.memory.read_buffer(74, 1).unwrap()[0], 0, "clock");
}

#[tokio::test]
async fn polling_zero_subscriptions_is_invalid() {
    let mut harness = harness();
    let errno = harness
        .call(
            WasiApiName::POLL_ONEOFF,
            &[
                WasmValue::I32(0),
                WasmValue::I32(64),
                WasmValue::I32(0),
                WasmValue::I32(RESULT_AT as i32),
            ],
        )
        .await;
    assert_eq!(errno, ErrNo::Inval);
}

#[tokio::test]
async fn fd_subscriptions_complete_immediately_with_nosys() {
    let mut harness = harness();
    // subscription: userdata, tag = fd_read on descriptor 0.
    harness.memory.write_u64(0, 7).unwrap();
    harness.memory.write_buffer(8, &[1]).unwrap();
    harness.memory.write_u32(16, 0).unwrap();

    let started = Instant::now();
    let errno = harness
        .call(
            WasiApiName::POLL_ONEOFF,
            &[
                WasmValue::I32(0),
                WasmValue::I32(64),
                WasmValue::I32(1),
                WasmValue::I32(RESULT_AT as i32),
            ],
        )
        .await;
    assert_eq!(errno, ErrNo::Success);
    assert!(started.elapsed() < Duration::from_millis(20));
    assert_eq!(harness.memory.read_u32(RESULT_AT).unwrap(), 1);
    assert_eq!(harness.memory.read_u64(64).unwrap(), 7);
    assert_eq!(harness.memory.read_u16(72).unwrap(), 52);
}

#[tokio::test]
async fn cancellation_aborts_a_pending_clock_wait() {
    let root = MemoryDir::new();
    let cancel = CancelToken::new();
    let config = Config {
        preopens: vec![(String::from("/sandbox"), Arc::new(root) as _)],
        stdin: Box::new(ByteSource::empty()),
        stdout: Box::new(SharedSink::new()),
        stderr: Box::new(SharedSink::new()),
        program_name: String::from("guest"),
        arguments: vec![],
        environment: vec![],
        enable_strace: false,
        cancel: Some(cancel.clone()),
    };
    let mut bindings = Bindings::new(config);
    let mut memory = VecMemory::new(1024);
    // A ten-second clock subscription.
    memory.write_u64(0, 1).unwrap();
    memory.write_buffer(8, &[0]).unwrap();
    memory.write_u32(16, 1).unwrap();
    memory.write_u64(24, 10_000_000_000).unwrap();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.cancel();
    });
    let started = Instant::now();
    let errno = bindings
        .dispatch(
            WasiApiName::POLL_ONEOFF,
            &mut memory,
            &[
                WasmValue::I32(0),
                WasmValue::I32(64),
                WasmValue::I32(1),
                WasmValue::I32(128),
            ],
        )
        .await
        .unwrap();
    assert_eq!(errno, ErrNo::Canceled);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn cancellation_rolls_back_staged_writes() {
    let cancel = CancelToken::new();
    let root = MemoryDir::new();
    root.install_file("doc", b"untouched");
    let config = Config {
        preopens: vec![(String::from("/sandbox"), Arc::new(root.clone()) as _)],
        stdin: Box::new(ByteSource::empty()),
        stdout: Box::new(SharedSink::new()),
        stderr: Box::new(SharedSink::new()),
        program_name: String::from("guest"),
        arguments: vec![],
        environment: vec![],
        enable_strace: false,
        cancel: Some(cancel.clone()),
    };
    let mut bindings = Bindings::new(config);
    let mut memory = VecMemory::new(4096);
    memory.write_buffer(0, b"doc").unwrap();
    let errno = bindings
        .dispatch(
            WasiApiName::PATH_OPEN,
            &mut memory,
            &[
                WasmValue::I32(3),
                WasmValue::I32(0),
                WasmValue::I32(0),
                WasmValue::I32(3),
                WasmValue::I32(0),
                WasmValue::I64(0),
                WasmValue::I64(0),
                WasmValue::I32(0),
                WasmValue::I32(512),
            ],
        )
        .await
        .unwrap();
    assert_eq!(errno, ErrNo::Success);
    let fd = memory.read_u32(512).unwrap();

    cancel.cancel();
    memory.write_buffer(256, b"clobbered").unwrap();
    memory.write_u32(128, 256).unwrap();
    memory.write_u32(132, 9).unwrap();
    let errno = bindings
        .dispatch(
            WasiApiName::FD_WRITE,
            &mut memory,
            &[
                WasmValue::I32(fd as i32),
                WasmValue::I32(128),
                WasmValue::I32(1),
                WasmValue::I32(512),
            ],
        )
        .await
        .unwrap();
    assert_eq!(errno, ErrNo::Canceled);
    let file = root.open_file("doc", false).await.unwrap();
    let snapshot = file.snapshot().await.unwrap();
    assert_eq!(snapshot.read_at(0, 64).await.unwrap(), b"untouched");
}

#[tokio::test]
async fn argv_marshals_with_the_program_name_prepended() {
    let mut harness = harness();
    let errno = harness
        .call(
            WasiApiName::ARGS_SIZES_GET,
            &[WasmValue::I32(0), WasmValue::I32(4)],
        )
        .await;
    assert_eq!(errno, ErrNo::Success);
    assert_eq!(harness.memory.read_u32(0).unwrap(), 4);
    assert_eq!(harness.memory.read_u32(4).unwrap(), 24);

    let errno = harness
        .call(
            WasiApiName::ARGS_GET,
            &[WasmValue::I32(0), WasmValue::I32(64)],
        )
        .await;
    assert_eq!(errno, ErrNo::Success);
    assert_eq!(
        harness.memory.read_buffer(64, 24).unwrap(),
        b"wc\0foo\0-bar\0--baz=value\0"
    );
    // The per-string pointers are the packed offsets, shifted by the
    // prepended program name: [0, 4, 9] becomes [3, 7, 12] after "wc\0".
    let pointers: Vec<u32> = (0..4)
        .map(|index| harness.memory.read_u32(index * 4).unwrap() - 64)
        .collect();
    assert_eq!(pointers, vec![0, 3, 7, 12]);
}

#[tokio::test]
async fn environ_marshals_key_value_pairs() {
    let mut harness = harness();
    let errno = harness
        .call(
            WasiApiName::ENVIRON_SIZES_GET,
            &[WasmValue::I32(0), WasmValue::I32(4)],
        )
        .await;
    assert_eq!(errno, ErrNo::Success);
    assert_eq!(harness.memory.read_u32(0).unwrap(), 1);
    assert_eq!(harness.memory.read_u32(4).unwrap(), 7);
    harness
        .call(
            WasiApiName::ENVIRON_GET,
            &[WasmValue::I32(0), WasmValue::I32(64)],
        )
        .await;
    assert_eq!(harness.memory.read_buffer(64, 7).unwrap(), b"LANG=C\0");
}

#[tokio::test]
async fn exclusive_create_on_an_existing_path_is_exist() {
    let mut harness = harness();
    harness.root.install_file("taken", b"");
    let errno = harness
        .path_open("/sandbox/taken", OFLAG_CREATE | OFLAG_EXCL)
        .await
        .err();
    assert_eq!(errno, Some(ErrNo::Exist));
}

#[tokio::test]
async fn removing_the_preopen_root_is_denied() {
    let mut harness = harness();
    let (path_at, path_len) = harness.store_path(".");
    let errno = harness
        .call(
            WasiApiName::PATH_REMOVE_DIRECTORY,
            &[
                WasmValue::I32(3),
                WasmValue::I32(path_at as i32),
                WasmValue::I32(path_len as i32),
            ],
        )
        .await;
    assert_eq!(errno, ErrNo::Access);
}

#[tokio::test]
async fn reading_a_directory_descriptor_is_isdir() {
    let mut harness = harness();
    let (errno, _) = harness.fd_read(3, 64).await;
    assert_eq!(errno, ErrNo::IsDir);
}

#[tokio::test]
async fn stdout_writes_reach_the_configured_sink() {
    let mut harness = harness();
    let (errno, written) = harness.fd_write(1, b"to the terminal\n").await;
    assert_eq!(errno, ErrNo::Success);
    assert_eq!(written, 16);
    assert_eq!(harness.stdout.contents(), b"to the terminal\n");
}

#[tokio::test]
async fn stdin_reads_drain_the_configured_source() {
    let mut harness = harness_with(vec![], b"typed input");
    let (errno, bytes) = harness.fd_read(0, 5).await;
    assert_eq!(errno, ErrNo::Success);
    assert_eq!(bytes, b"typed");
    let (_, bytes) = harness.fd_read(0, 4096).await;
    assert_eq!(bytes, b" input");
    let (_, bytes) = harness.fd_read(0, 4096).await;
    assert_eq!(bytes, b"");
}

#[tokio::test]
async fn absolute_paths_select_the_longest_matching_preopen() {
    let nested = Arc::new(MemoryDir::new());
    let mut harness = harness_with(vec![(String::from("/sandbox/nested"), nested.clone())], b"");
    let fd = harness
        .path_open("/sandbox/nested/inner.txt", OFLAG_CREATE)
        .await
        .expect("open succeeds");
    let (errno, _) = harness.fd_write(fd, b"deep").await;
    assert_eq!(errno, ErrNo::Success);
    harness.fd_close(fd).await;
    // The file landed in the nested mount, not under /sandbox itself.
    let file = nested.open_file("inner.txt", false).await.expect("exists");
    let snapshot = file.snapshot().await.unwrap();
    assert_eq!(snapshot.read_at(0, 16).await.unwrap(), b"deep");
    assert!(harness
        .root
        .open_file("inner.txt", false)
        .await
        .is_err());
}

#[tokio::test]
async fn seek_and_tell_track_written_bytes() {
    let mut harness = harness();
    let fd = harness
        .path_open("/sandbox/pos.txt", OFLAG_CREATE)
        .await
        .expect("open succeeds");
    harness.fd_write(fd, b"abcdef").await;
    // fd_seek(fd, 0, CURRENT) observes the advanced position.
    let errno = harness
        .call(
            WasiApiName::FD_SEEK,
            &[
                WasmValue::I32(fd as i32),
                WasmValue::I64(0),
                WasmValue::I32(1),
                WasmValue::I32(RESULT_AT as i32),
            ],
        )
        .await;
    assert_eq!(errno, ErrNo::Success);
    assert_eq!(harness.memory.read_u64(RESULT_AT).unwrap(), 6);
    // Seeking before the start of the file is out of range.
    let errno = harness
        .call(
            WasiApiName::FD_SEEK,
            &[
                WasmValue::I32(fd as i32),
                WasmValue::I64(-7),
                WasmValue::I32(1),
                WasmValue::I32(RESULT_AT as i32),
            ],
        )
        .await;
    assert_eq!(errno, ErrNo::Inval);
    // Seek from END, then read back the tail.
    let errno = harness
        .call(
            WasiApiName::FD_SEEK,
            &[
                WasmValue::I32(fd as i32),
                WasmValue::I64(-2),
                WasmValue::I32(2),
                WasmValue::I32(RESULT_AT as i32),
            ],
        )
        .await;
    assert_eq!(errno, ErrNo::Success);
    let (_, bytes) = harness.fd_read(fd, 16).await;
    assert_eq!(bytes, b"ef");
}

#[tokio::test]
async fn filestat_reports_sizes_and_zero_inodes() {
    let mut harness = harness();
    harness.root.install_file("stat.txt", b"0123456789");
    let (path_at, path_len) = harness.store_path("stat.txt");
    let errno = harness
        .call(
            WasiApiName::PATH_FILESTAT_GET,
            &[
                WasmValue::I32(3),
                WasmValue::I32(0),
                WasmValue::I32(path_at as i32),
                WasmValue::I32(path_len as i32),
                WasmValue::I32(BUF_AT as i32),
            ],
        )
        .await;
    assert_eq!(errno, ErrNo::Success);
    assert_eq!(harness.memory.read_u64(BUF_AT).unwrap(), 0, "dev");
    assert_eq!(harness.memory.read_u64(BUF_AT + 8).unwrap(), 0, "ino");
    assert_eq!(
        harness.memory.read_buffer(BUF_AT + 16, 1).unwrap()[0],
        4,
        "regular file"
    );
    assert_eq!(harness.memory.read_u64(BUF_AT + 32).unwrap(), 10, "size");
    let mtime = harness.memory.read_u64(BUF_AT + 48).unwrap();
    assert_eq!(mtime % 1_000_000, 0, "millisecond clock widened to ns");
    assert!(mtime > 0);
}

#[tokio::test]
async fn unlinking_files_and_directories_is_typed() {
    let mut harness = harness();
    harness.root.install_file("f", b"");
    let sub = harness.root.install_dir("d");
    sub.install_file("inner", b"");

    let (path_at, path_len) = harness.store_path("d");
    let errno = harness
        .call(
            WasiApiName::PATH_UNLINK_FILE,
            &[
                WasmValue::I32(3),
                WasmValue::I32(path_at as i32),
                WasmValue::I32(path_len as i32),
            ],
        )
        .await;
    assert_eq!(errno, ErrNo::IsDir, "unlink_file refuses directories");

    let errno = harness
        .call(
            WasiApiName::PATH_REMOVE_DIRECTORY,
            &[
                WasmValue::I32(3),
                WasmValue::I32(path_at as i32),
                WasmValue::I32(path_len as i32),
            ],
        )
        .await;
    assert_eq!(errno, ErrNo::NotEmpty, "the directory is populated");

    let (path_at, path_len) = harness.store_path("f");
    let errno = harness
        .call(
            WasiApiName::PATH_UNLINK_FILE,
            &[
                WasmValue::I32(3),
                WasmValue::I32(path_at as i32),
                WasmValue::I32(path_len as i32),
            ],
        )
        .await;
    assert_eq!(errno, ErrNo::Success);
    assert!(harness.root.open_file("f", false).await.is_err());
}

#[tokio::test]
async fn create_directory_then_list_it_through_a_descriptor() {
    let mut harness = harness();
    let (path_at, path_len) = harness.store_path("made");
    let errno = harness
        .call(
            WasiApiName::PATH_CREATE_DIRECTORY,
            &[
                WasmValue::I32(3),
                WasmValue::I32(path_at as i32),
                WasmValue::I32(path_len as i32),
            ],
        )
        .await;
    assert_eq!(errno, ErrNo::Success);
    // Creating it again must fail: the create is exclusive.
    let errno = harness
        .call(
            WasiApiName::PATH_CREATE_DIRECTORY,
            &[
                WasmValue::I32(3),
                WasmValue::I32(path_at as i32),
                WasmValue::I32(path_len as i32),
            ],
        )
        .await;
    assert_eq!(errno, ErrNo::Exist);

    const OFLAG_DIRECTORY: u16 = 1 << 1;
    let fd = harness
        .path_open("/sandbox/made", OFLAG_DIRECTORY)
        .await
        .expect("opens as directory");
    let (errno, used, _) = harness.fd_readdir(fd, 256, 0).await;
    assert_eq!(errno, ErrNo::Success);
    assert_eq!(used, 0, "freshly created directory is empty");
}
