//! CONTEXT: Process bridge end-to-end tests against the reference host
//! OWNERS: @runtime
//! STATUS: Functional
//! TEST_COVERAGE: 12 integration tests
//!
//! TEST_SCENARIOS:
//!   - test_wait_mode_matches_nowait_then_waitpid(): P_WAIT status equals the reaped status
//!   - test_script_runs_under_interpreter(): `#!` line rewrites argv before the host sees it
//!   - test_pipe_end_reaches_child_on_same_descriptor(): fd and pipe id survive the spawn
//!   - test_duplicated_write_end_is_one_description_in_child(): fds 7 and 8 share one host reference
//!   - test_pipeline_builtin_chains_two_children(): vfork redirections feed echo into cat
//!   - test_vfork_children_get_distinct_pids(): exec and exit sessions allocate their own pids
//!   - test_posix_vfork_triple(): C-shaped vfork/exec/after plus errno reporting
//!   - test_concurrent_spawns(): parallel spawns from one process get their own replies
//!   - test_process_group_wait(): setpgid then waitpid on the group
//!   - test_child_identity(): pid, ppid and session of a spawned child
//!   - test_unknown_program_is_enoent(): host lookup failure surfaces as ENOENT
//!   - test_exit_outside_vfork_ends_only_that_process(): `_exit` unwinds one program, not the host

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use procbridge_abi::{Errno, Pid, SpawnMode, WaitOptions, WaitStatus};
use procbridge_loader::MemoryFileSystem;
use procbridge_spawn::posix;
use spawn_e2e::{argv, read_to_end, Harness};

fn exit_status(harness: &Harness, pid: Pid) -> i32 {
    let reaped = harness.root.waitpid(pid, WaitOptions::empty()).unwrap();
    assert_eq!(reaped.pid, pid);
    reaped.status.unwrap().exit_status()
}

#[test]
fn test_wait_mode_matches_nowait_then_waitpid() {
    let h = Harness::new();
    h.procd.register("exit3", |_, _| 3);

    let word = h.root.spawnv(SpawnMode::Wait, "exit3", &argv(&["exit3"])).unwrap();
    assert_eq!(WaitStatus::from_raw(word).exit_status(), 3);

    let pid = h.root.spawnv(SpawnMode::NoWait, "exit3", &argv(&["exit3"])).unwrap();
    let reaped = h.root.waitpid(pid, WaitOptions::empty()).unwrap();
    assert_eq!(reaped.pid, pid);
    assert_eq!(reaped.status.unwrap().raw(), word);
}

#[test]
fn test_script_runs_under_interpreter() {
    let fs = MemoryFileSystem::new().with("/scripts/build.sh", "#!/usr/bin/runner -x\necho hi\n");
    let h = Harness::with_filesystem(Arc::new(fs));
    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = seen.clone();
        h.procd.register("runner", move |_, args| {
            *seen.lock() = args.to_vec();
            0
        });
    }

    let word = h.root.spawnv(SpawnMode::Wait, "/scripts/build.sh", &argv(&["/scripts/build.sh", "all"])).unwrap();
    assert_eq!(word, 0);
    assert_eq!(*seen.lock(), argv(&["runner", "-x", "/scripts/build.sh", "all"]));
}

#[test]
fn test_pipe_end_reaches_child_on_same_descriptor() {
    let h = Harness::new();
    h.procd.register("report", |process, args| {
        let expected: u64 = args.get(1).and_then(|id| id.parse().ok()).unwrap_or(0);
        match process.fstat(7) {
            Ok(stat) if stat.ino == expected => {}
            _ => return 2,
        }
        match process.write(7, b"from child") {
            Ok(_) => 0,
            Err(_) => 3,
        }
    });

    let [read_fd, write_fd] = h.root.pipe().unwrap();
    let pipe_id = h.root.fstat(read_fd).unwrap().ino;
    h.root.dup2(write_fd, 7).unwrap();
    h.root.close(write_fd).unwrap();
    h.root.set_cloexec(read_fd, true).unwrap();

    let pid = h.root.spawnv(SpawnMode::NoWait, "report", &argv(&["report", &pipe_id.to_string()])).unwrap();
    h.root.close(7).unwrap();
    assert_eq!(read_to_end(&h.root, read_fd).unwrap(), b"from child");
    assert_eq!(exit_status(&h, pid), 0);

    h.root.close(read_fd).unwrap();
    assert!(h.procd.pipes().is_empty());
}

#[test]
fn test_duplicated_write_end_is_one_description_in_child() {
    let h = Harness::new();
    h.procd.register("twice", |process, _| {
        let same_pipe = match (process.fstat(7), process.fstat(8)) {
            (Ok(first), Ok(second)) => first.ino == second.ino,
            _ => false,
        };
        if !same_pipe {
            return 2;
        }
        let mut gate = [0u8; 1];
        let steps = process
            .write(7, b"a")
            .and_then(|_| process.close(7))
            .and_then(|()| process.read(0, &mut gate))
            .and_then(|_| process.write(8, b"b"))
            .and_then(|_| process.close(8));
        match steps {
            Ok(()) => 0,
            Err(_) => 3,
        }
    });

    let [read_fd, write_fd] = h.root.pipe().unwrap();
    let pipe_id = i32::try_from(h.root.fstat(read_fd).unwrap().ino).unwrap();
    h.root.dup2(write_fd, 7).unwrap();
    h.root.dup2(write_fd, 8).unwrap();
    h.root.close(write_fd).unwrap();
    h.root.set_cloexec(read_fd, true).unwrap();
    let [gate_read, gate_write] = h.root.pipe().unwrap();
    h.root.dup2(gate_read, 0).unwrap();
    h.root.close(gate_read).unwrap();
    h.root.set_cloexec(gate_write, true).unwrap();

    let pid = h.root.spawnv(SpawnMode::NoWait, "twice", &argv(&["twice"])).unwrap();
    h.root.close(7).unwrap();
    h.root.close(8).unwrap();
    h.root.close(0).unwrap();

    let mut buf = [0u8; 8];
    assert_eq!(h.root.read(read_fd, &mut buf).unwrap(), 1);
    assert_eq!(&buf[..1], b"a");
    // The child closed fd 7 but still holds fd 8: one write description remains.
    assert_eq!(h.procd.pipes().ends(pipe_id), Some((1, 1)));

    h.root.write(gate_write, b"g").unwrap();
    assert_eq!(read_to_end(&h.root, read_fd).unwrap(), b"b");
    assert_eq!(exit_status(&h, pid), 0);

    h.root.close(read_fd).unwrap();
    h.root.close(gate_write).unwrap();
    assert!(h.procd.pipes().is_empty());
}

#[test]
fn test_pipeline_builtin_chains_two_children() {
    let h = Harness::new();
    let [read_fd, write_fd] = h.root.pipe().unwrap();
    h.root.dup2(write_fd, 1).unwrap();
    h.root.close(write_fd).unwrap();
    h.root.set_cloexec(read_fd, true).unwrap();

    let args = argv(&["pipeline", "echo", "hello", "world", "|", "cat"]);
    let pid = h.root.spawnv(SpawnMode::NoWait, "pipeline", &args).unwrap();
    h.root.close(1).unwrap();
    assert_eq!(read_to_end(&h.root, read_fd).unwrap(), b"hello world\n");
    assert_eq!(exit_status(&h, pid), 0);

    h.root.close(read_fd).unwrap();
    assert!(h.procd.pipes().is_empty());
}

#[test]
fn test_vfork_children_get_distinct_pids() {
    let h = Harness::new();
    let first = h.root.vfork_exec("true", &argv(&["true"]), None).unwrap();
    let second = h.root.vfork_exec("false", &argv(&["false"]), None).unwrap();
    assert_ne!(first, second);

    let mut session = h.root.vfork_before();
    session.exit(5).unwrap();
    let dead = session.after().unwrap();
    assert!(dead != first && dead != second);

    assert_eq!(exit_status(&h, first), 0);
    assert_eq!(exit_status(&h, second), 1);
    assert_eq!(exit_status(&h, dead), 5);
}

#[test]
fn test_posix_vfork_triple() {
    let h = Harness::new();
    posix::vfork_before(&h.root);
    assert_eq!(posix::vfork_after(false), 0);
    assert_eq!(posix::execv(&h.root, "false", &argv(&["false"])), 0);
    let pid = posix::vfork_after(true);
    assert!(pid > 0);

    let mut status = 0;
    assert_eq!(posix::waitpid(&h.root, pid, Some(&mut status), 0), pid);
    assert_eq!(status, 1 << 8);
    assert_eq!(posix::waitpid(&h.root, pid, None, 0), -1);
    assert_eq!(posix::errno(), Errno::ECHILD.raw());
    assert_eq!(posix::vfork_after(true), -1);
    assert_eq!(posix::errno(), Errno::EINVAL.raw());
}

#[test]
fn test_concurrent_spawns() {
    let h = Harness::new();
    h.procd.register("code", |_, args| args.get(1).and_then(|code| code.parse().ok()).unwrap_or(255));

    let workers: Vec<_> = (0..8)
        .map(|code: i32| {
            let root = h.root.clone();
            thread::spawn(move || {
                let pid = root.spawnv(SpawnMode::NoWait, "code", &argv(&["code", &code.to_string()])).unwrap();
                (pid, code)
            })
        })
        .collect();
    let spawned: Vec<(Pid, i32)> = workers.into_iter().map(|worker| worker.join().unwrap()).collect();

    let pids: BTreeSet<Pid> = spawned.iter().map(|(pid, _)| *pid).collect();
    assert_eq!(pids.len(), spawned.len());
    for (pid, code) in spawned {
        assert_eq!(exit_status(&h, pid), code);
    }
}

#[test]
fn test_process_group_wait() {
    let h = Harness::new();
    h.procd.register("block", |process, _| match read_to_end(process, 0) {
        Ok(_) => 0,
        Err(_) => 1,
    });
    let [read_fd, write_fd] = h.root.pipe().unwrap();
    h.root.dup2(read_fd, 0).unwrap();
    h.root.close(read_fd).unwrap();
    h.root.set_cloexec(write_fd, true).unwrap();

    let pid = h.root.spawnv(SpawnMode::NoWait, "block", &argv(&["block"])).unwrap();
    h.root.setpgid(pid, 0).unwrap();
    assert_eq!(h.root.getpgid(pid).unwrap(), pid);
    assert_eq!(h.root.waitpid(-pid, WaitOptions::NOHANG).unwrap().pid, 0);
    assert_eq!(h.root.waitpid(0, WaitOptions::NOHANG).unwrap_err().errno(), Errno::ECHILD);

    h.root.close(write_fd).unwrap();
    let reaped = h.root.waitpid(-pid, WaitOptions::empty()).unwrap();
    assert_eq!(reaped.pid, pid);
    assert_eq!(reaped.status.unwrap().exit_status(), 0);
}

#[test]
fn test_child_identity() {
    let h = Harness::new();
    h.procd.register("whoami", |process, args| {
        let parent: Pid = args.get(1).and_then(|pid| pid.parse().ok()).unwrap_or(-1);
        if !matches!(process.getppid(), Ok(ppid) if ppid == parent) {
            return 1;
        }
        match process.setsid() {
            Ok(sid) if sid == process.getpid() => {}
            _ => return 2,
        }
        match process.getpgrp() {
            Ok(pgid) if pgid == process.getpid() => 0,
            _ => 3,
        }
    });

    let root_pid = h.root.getpid();
    assert_eq!(h.root.setsid().unwrap_err().errno(), Errno::EPERM);
    let pid = h.root.spawnv(SpawnMode::NoWait, "whoami", &argv(&["whoami", &root_pid.to_string()])).unwrap();
    assert_ne!(pid, root_pid);
    assert_eq!(exit_status(&h, pid), 0);
    assert_eq!(h.root.getsid(0).unwrap(), root_pid);
}

#[test]
fn test_unknown_program_is_enoent() {
    let h = Harness::new();
    let err = h.root.spawnv(SpawnMode::NoWait, "nosuch", &argv(&["nosuch"])).unwrap_err();
    assert_eq!(err.errno(), Errno::ENOENT);
    assert_eq!(posix::spawnv(&h.root, SpawnMode::P_NOWAIT, "nosuch", &argv(&["nosuch"])), -1);
    assert_eq!(posix::errno(), Errno::ENOENT.raw());
    assert_eq!(h.root.waitpid(-1, WaitOptions::NOHANG).unwrap_err().errno(), Errno::ECHILD);
}

#[test]
fn test_exit_outside_vfork_ends_only_that_process() {
    let h = Harness::new();
    h.procd.register("quit", |process, _| {
        posix::vfork_exit(process, 7);
        0
    });
    let first = h.root.spawnv(SpawnMode::NoWait, "quit", &argv(&["quit"])).unwrap();
    assert_eq!(exit_status(&h, first), 7);
    let word = h.root.spawnv(SpawnMode::Wait, "quit", &argv(&["quit"])).unwrap();
    assert_eq!(WaitStatus::from_raw(word).exit_status(), 7);
    assert_eq!(h.root.getsid(0).unwrap(), h.root.getpid());
}
