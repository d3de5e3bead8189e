//! Profiling macros and scope guards.

use crate::clock;
use crate::name::ScopeName;
use crate::thread::{with_current, ScopeHandle, ThreadRecorder};

/// RAII guard that closes its scope on drop.
///
/// Closing happens on every exit path, unwinding included.
#[must_use = "the scope closes as soon as the guard is dropped"]
pub struct ScopeGuard<'a> {
    /// `None` closes through the thread's installed recorder.
    recorder: Option<&'a ThreadRecorder>,
    handle: ScopeHandle,
}

impl<'a> ScopeGuard<'a> {
    /// Open a scope on an explicit recorder.
    #[inline]
    pub fn open(recorder: &'a ThreadRecorder, name: &'static str) -> Self {
        Self {
            recorder: Some(recorder),
            handle: recorder.open_scope(ScopeName::new(name)),
        }
    }

    /// Whether the scope is being recorded.
    #[inline]
    #[must_use]
    pub const fn is_recording(&self) -> bool {
        self.handle.is_enabled()
    }
}

impl ScopeGuard<'static> {
    /// Open a scope on the recorder installed on this thread, if any.
    #[inline]
    pub fn current(name: &'static str) -> Self {
        Self {
            recorder: None,
            handle: with_current(|r| r.open_scope(ScopeName::new(name)))
                .unwrap_or_else(ScopeHandle::disabled),
        }
    }
}

impl Drop for ScopeGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        let end = clock::cycles();
        let handle = std::mem::replace(&mut self.handle, ScopeHandle::disabled());
        if !handle.is_enabled() {
            return;
        }
        match self.recorder {
            Some(recorder) => recorder.close_scope_at(handle, end),
            None => {
                with_current(|r| r.close_scope_at(handle, end));
            }
        }
    }
}

/// Time the rest of the enclosing block as a named scope on the current
/// thread's installed recorder.
///
/// When the `profiling` feature is disabled, this macro expands to nothing.
///
/// # Examples
///
/// ```ignore
/// use framescope_profiler::profile_scope;
///
/// fn simulate() {
///     profile_scope!("simulate");
///     // ... work
/// } // scope closed here
/// ```
///
/// With an explicit recorder:
/// ```ignore
/// profile_scope!(recorder, "simulate");
/// ```
#[cfg(feature = "profiling")]
#[macro_export]
macro_rules! profile_scope {
    ($name:literal) => {
        let _framescope_guard = $crate::ScopeGuard::current($name);
    };
    ($recorder:expr, $name:literal) => {
        let _framescope_guard = $crate::ScopeGuard::open(&$recorder, $name);
    };
}

#[cfg(not(feature = "profiling"))]
#[macro_export]
macro_rules! profile_scope {
    ($name:literal) => {};
    ($recorder:expr, $name:literal) => {};
}

/// Time the rest of the enclosing function, named after its path.
///
/// When the `profiling` feature is disabled, this macro expands to nothing.
#[cfg(feature = "profiling")]
#[macro_export]
macro_rules! profile_function {
    () => {
        let _framescope_guard = $crate::ScopeGuard::current({
            fn f() {}
            fn type_name_of<T>(_: T) -> &'static str {
                ::std::any::type_name::<T>()
            }
            // One address per call site, so every call is the same scope.
            static NAME: ::std::sync::OnceLock<&'static str> = ::std::sync::OnceLock::new();
            *NAME.get_or_init(|| {
                let name = type_name_of(f);
                name.strip_suffix("::f").unwrap_or(name)
            })
        });
    };
}

#[cfg(not(feature = "profiling"))]
#[macro_export]
macro_rules! profile_function {
    () => {};
}

/// Count a draw call from this call site on a [`Profiler`](crate::Profiler).
///
/// When the `profiling` feature is disabled, this macro expands to nothing.
#[cfg(feature = "profiling")]
#[macro_export]
macro_rules! track_draw_call {
    ($profiler:expr, $vertex_count:expr) => {
        let _ = $profiler.track_draw_call(
            concat!(module_path!(), ":", line!()),
            $vertex_count,
        );
    };
}

#[cfg(not(feature = "profiling"))]
#[macro_export]
macro_rules! track_draw_call {
    ($profiler:expr, $vertex_count:expr) => {};
}

/// Log a wait on a lock that is not a [`TimedMutex`](crate::TimedMutex).
///
/// When the `profiling` feature is disabled, this macro expands to nothing.
#[cfg(feature = "profiling")]
#[macro_export]
macro_rules! mutex_waiting {
    ($lock:expr) => {
        let _ = $crate::with_current(|r| r.mutex_waiting($crate::MutexId::of(&$lock)));
    };
}

#[cfg(not(feature = "profiling"))]
#[macro_export]
macro_rules! mutex_waiting {
    ($lock:expr) => {};
}

/// Log the acquisition of a lock.
///
/// When the `profiling` feature is disabled, this macro expands to nothing.
#[cfg(feature = "profiling")]
#[macro_export]
macro_rules! mutex_acquired {
    ($lock:expr) => {
        let _ = $crate::with_current(|r| r.mutex_acquired($crate::MutexId::of(&$lock)));
    };
}

#[cfg(not(feature = "profiling"))]
#[macro_export]
macro_rules! mutex_acquired {
    ($lock:expr) => {};
}

/// Log the release of a lock.
///
/// When the `profiling` feature is disabled, this macro expands to nothing.
#[cfg(feature = "profiling")]
#[macro_export]
macro_rules! mutex_released {
    ($lock:expr) => {
        let _ = $crate::with_current(|r| r.mutex_released($crate::MutexId::of(&$lock)));
    };
}

#[cfg(not(feature = "profiling"))]
#[macro_export]
macro_rules! mutex_released {
    ($lock:expr) => {};
}
