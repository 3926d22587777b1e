#![cfg(target_os = "linux")]

use std::ffi::{c_int, c_void};

use exitfn_abi::stdlib_abi::{EXIT_LIST, QUICK_EXIT_LIST, __cxa_atexit, __internal_atexit};
use exitfn_core::errno;
use exitfn_core::stdlib::{ExitList, registry_for};

unsafe extern "C" fn on_exit(_arg: *mut c_void) {}

fn last_errno() -> Option<c_int> {
    std::io::Error::last_os_error().raw_os_error()
}

fn clear_errno() {
    unsafe { *libc::__errno_location() = 0 };
}

fn pending_with_arg(list: ExitList, arg: usize) -> Vec<(usize, usize)> {
    registry_for(list)
        .lock()
        .pending()
        .filter(|(_, handler)| handler.arg.0 == arg)
        .map(|(_, handler)| (handler.callback_addr(), handler.owner.0))
        .collect()
}

#[test]
fn cxa_atexit_registers_on_exit_list() {
    let arg = 0xab_0001_usize as *mut c_void;
    let owner = 0xd50_usize as *mut c_void;
    let rc = unsafe { __cxa_atexit(Some(on_exit), arg, owner) };
    assert_eq!(rc, 0);

    let found = pending_with_arg(ExitList::Exit, arg as usize);
    assert_eq!(found, vec![(on_exit as usize, owner as usize)]);
    assert!(pending_with_arg(ExitList::QuickExit, arg as usize).is_empty());
}

#[test]
fn internal_atexit_selects_quick_exit_list() {
    let arg = 0xab_0002_usize as *mut c_void;
    let rc = unsafe {
        __internal_atexit(Some(on_exit), arg, std::ptr::null_mut(), QUICK_EXIT_LIST)
    };
    assert_eq!(rc, 0);

    assert_eq!(pending_with_arg(ExitList::QuickExit, arg as usize).len(), 1);
    assert!(pending_with_arg(ExitList::Exit, arg as usize).is_empty());
}

#[test]
fn null_callback_sets_einval() {
    clear_errno();
    let arg = 0xab_0003_usize as *mut c_void;
    let rc = unsafe { __cxa_atexit(None, arg, std::ptr::null_mut()) };
    assert_eq!(rc, -1);
    assert_eq!(last_errno(), Some(errno::EINVAL));
    assert!(pending_with_arg(ExitList::Exit, arg as usize).is_empty());
}

#[test]
fn unknown_list_sets_einval() {
    clear_errno();
    let arg = 0xab_0004_usize as *mut c_void;
    for list in [2, -1, c_int::MAX] {
        let rc =
            unsafe { __internal_atexit(Some(on_exit), arg, std::ptr::null_mut(), list) };
        assert_eq!(rc, -1, "list {list}");
        assert_eq!(last_errno(), Some(errno::EINVAL));
    }
    assert!(pending_with_arg(ExitList::Exit, arg as usize).is_empty());
    assert!(pending_with_arg(ExitList::QuickExit, arg as usize).is_empty());
}

#[test]
fn repeated_registrations_walk_newest_first() {
    let base = 0xab_1000_usize;
    for i in 0..40 {
        let rc = unsafe {
            __internal_atexit(
                Some(on_exit),
                (base + i) as *mut c_void,
                std::ptr::null_mut(),
                EXIT_LIST,
            )
        };
        assert_eq!(rc, 0);
    }

    let walked: Vec<usize> = registry_for(ExitList::Exit)
        .lock()
        .pending()
        .map(|(_, handler)| handler.arg.0)
        .filter(|arg| (base..base + 40).contains(arg))
        .collect();
    let expected: Vec<usize> = (0..40).rev().map(|i| base + i).collect();
    assert_eq!(walked, expected);
}
