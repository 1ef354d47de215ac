use super::machine::*;
use crate::cpu_x86_64::{gp, Context, HandleSettings, Registry, StopReason, Width};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn test_run_through_handle() {
    let registry = Registry::new();
    // MOV EAX, 42
    let handle = registry.register("vm", machine(&[0xB8, 0x2A, 0, 0, 0]), HandleSettings::NONE);

    let status = handle.run(false).unwrap();
    assert_eq!(status.stop, StopReason::EndOfCode);
    let ctx = handle.context().unwrap();
    assert_eq!(reg(&ctx, gp::RAX), 42);
    assert_eq!(registry.owner(), None);
}

#[test]
fn test_handles_are_isolated() {
    let registry = Registry::new();
    let source = machine(&[0xFF, 0xC0]); // INC EAX
    let a = registry.register("a", source.deep_copy(), HandleSettings::NONE);
    let b = registry.register("b", source, HandleSettings::NONE);
    assert!(a.id() < b.id());
    assert_eq!(registry.len(), 2);

    a.run(false).unwrap();
    a.invoke(|ctx| ctx.instruction_pointer = 0x1000).unwrap();
    a.run(false).unwrap();

    assert_eq!(reg(&a.context().unwrap(), gp::RAX), 2);
    assert_eq!(reg(&b.context().unwrap(), gp::RAX), 0);
}

#[test]
fn test_context_is_a_deep_copy() {
    let registry = Registry::new();
    let handle = registry.register("copy", machine(&[0x90]), HandleSettings::NONE);

    let mut snapshot = handle.context().unwrap();
    set_reg(&mut snapshot, gp::RBX, 9);
    assert_eq!(reg(&handle.context().unwrap(), gp::RBX), 0);

    handle.update_context(snapshot).unwrap();
    assert_eq!(reg(&handle.context().unwrap(), gp::RBX), 9);
}

#[test]
fn test_invoke_holds_the_engine() {
    let registry = Registry::new();
    let handle = registry.register("busy", Context::default(), HandleSettings::NONE);
    assert!(!handle.is_busy());
    let inside = handle.invoke(|_| handle.is_busy()).unwrap();
    assert!(inside);
    assert!(!handle.is_busy());
}

#[test]
fn test_handle_settings_apply_to_runs() {
    let registry = Registry::new();
    let settings = HandleSettings::DISASSEMBLE | HandleSettings::NOJMP;
    let handle = registry.register("disasm", machine(&[0xEB, 0x00, 0x90]), settings);

    let status = handle.run(false).unwrap();
    assert_eq!(status.decoded_lines.len(), 2);
    assert_eq!(status.decoded_lines[0].text(), "JMP 0x1002");
    assert_eq!(handle.settings(), settings);
}

#[test]
fn test_run_async() {
    let registry = Registry::new();
    let code = [
        0xB9, 0x00, 0x01, 0x00, 0x00, // MOV ECX, 0x100
        0xFF, 0xC0, // INC EAX
        0xFF, 0xC9, // DEC ECX
        0x75, 0xFA, // JNZ -6
    ];
    let handle = registry.register("worker", machine(&code), HandleSettings::NONE);
    let task = handle.run_async(false).unwrap();
    let status = task.wait().unwrap();

    assert_eq!(status.stop, StopReason::EndOfCode);
    assert_eq!(handle.invoke(|ctx| reg(ctx, gp::RAX)).unwrap(), 0x100);
}

#[test]
fn test_single_owner_at_a_time() {
    let registry = Registry::new();
    let handles: Vec<_> = (0..4)
        .map(|i| registry.register(&format!("h{}", i), Context::default(), HandleSettings::NONE))
        .collect();

    let inside = Arc::new(AtomicBool::new(false));
    let entries = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = handles
        .into_iter()
        .map(|handle| {
            let inside = Arc::clone(&inside);
            let entries = Arc::clone(&entries);
            thread::spawn(move || {
                for _ in 0..10 {
                    handle
                        .invoke(|ctx| {
                            assert!(!inside.swap(true, Ordering::SeqCst), "two owners at once");
                            ctx.registers.write_gp(gp::RAX, Width::Qword, 1);
                            thread::sleep(Duration::from_micros(50));
                            entries.fetch_add(1, Ordering::SeqCst);
                            inside.store(false, Ordering::SeqCst);
                        })
                        .unwrap();
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(entries.load(Ordering::SeqCst), 40);
    assert_eq!(registry.owner(), None);
}

#[test]
fn test_async_runs_take_turns() {
    let registry = Registry::new();
    let code = [
        0xB9, 0x20, 0x4E, 0x00, 0x00, // MOV ECX, 20000
        0xFF, 0xC0, // INC EAX
        0xFF, 0xC9, // DEC ECX
        0x75, 0xFA, // JNZ -6
    ];
    let runners: Vec<_> = (0..4)
        .map(|i| registry.register(&format!("run{}", i), machine(&code), HandleSettings::NONE))
        .collect();
    let observer = registry.register("observer", Context::default(), HandleSettings::NONE);
    let ids: Vec<_> = runners.iter().map(|h| h.id()).collect();

    let tasks: Vec<_> = runners.iter().map(|h| h.run_async(false).unwrap()).collect();

    // While the observer owns the engine no run is in progress
    let mut seen = Vec::new();
    for _ in 0..20 {
        if let Some(owner) = registry.owner() {
            seen.push(owner);
        }
        observer
            .invoke(|_| {
                assert_eq!(registry.owner(), Some(observer.id()));
                assert!(runners.iter().all(|h| !h.is_busy()));
            })
            .unwrap();
        thread::sleep(Duration::from_micros(100));
    }

    for task in tasks {
        assert_eq!(task.wait().unwrap().stop, StopReason::EndOfCode);
    }
    assert!(seen.iter().all(|id| ids.contains(id) || *id == observer.id()));
    for handle in &runners {
        assert_eq!(handle.invoke(|ctx| reg(ctx, gp::RAX)).unwrap(), 20000);
        assert!(!handle.is_busy());
    }
    assert_eq!(registry.owner(), None);
}

#[test]
fn test_breakpoints_survive_runs() {
    let registry = Registry::new();
    let handle = registry.register("bp", machine(&[0x90, 0x90, 0x90]), HandleSettings::NONE);
    handle.invoke(|ctx| ctx.toggle_breakpoint(0x1001)).unwrap();

    assert_eq!(handle.run(false).unwrap().stop, StopReason::Breakpoint(0x1001));
    assert_eq!(handle.run(false).unwrap().stop, StopReason::EndOfCode);
    assert!(handle.context().unwrap().is_breakpoint(0x1001));
}
