//! Config for the tokio runtime that executes remote catalog requests.

use std::{
    num::NonZeroUsize,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

/// Tokio runtime type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum TokioRuntimeType {
    /// Current-thread runtime.
    CurrentThread,

    /// Multi-thread runtime.
    #[default]
    MultiThread,
}

#[cfg(unix)]
fn set_current_thread_priority(prio: i32) {
    // on linux setpriority sets the current thread's priority
    // (as opposed to the current process).
    unsafe { libc::setpriority(0, 0, prio) };
}

/// CLI config for the tokio catalog worker runtime.
#[derive(Debug, Clone, clap::Parser)]
#[allow(missing_copy_implementations)]
pub struct TokioWorkerConfig {
    /// Set the maximum number of catalog worker threads to use.
    ///
    /// Defaults to the number of logical cores on the system.
    #[clap(
        id = "catalog_runtime_num_threads",
        long = "num-catalog-threads",
        env = "METASTORE_NUM_CATALOG_THREADS",
        action
    )]
    pub num_threads: Option<NonZeroUsize>,

    /// Catalog tokio runtime type.
    #[clap(
        id = "catalog_runtime_type",
        long = "catalog-runtime-type",
        env = "METASTORE_CATALOG_RUNTIME_TYPE",
        default_value_t = TokioRuntimeType::default(),
        value_enum,
        action
    )]
    pub runtime_type: TokioRuntimeType,

    /// Sets a custom timeout for a thread in the blocking pool of the catalog runtime.
    #[clap(
        id = "catalog_runtime_thread_keep_alive",
        long = "catalog-runtime-thread-keep-alive",
        env = "METASTORE_CATALOG_RUNTIME_THREAD_KEEP_ALIVE",
        value_parser = humantime::parse_duration
    )]
    pub thread_keep_alive: Option<Duration>,

    /// Set thread priority of the catalog runtime workers.
    #[clap(
        id = "catalog_runtime_thread_priority",
        long = "catalog-runtime-thread-priority",
        env = "METASTORE_CATALOG_RUNTIME_THREAD_PRIORITY",
        action
    )]
    pub thread_priority: Option<i32>,
}

impl TokioWorkerConfig {
    /// Creates the tokio runtime builder.
    pub fn builder(&self) -> Result<::tokio::runtime::Builder, std::io::Error> {
        self.builder_with_name("catalog")
    }

    /// Creates the tokio runtime builder, naming its threads after `name`.
    fn builder_with_name(
        &self,
        name: &str,
    ) -> Result<::tokio::runtime::Builder, std::io::Error> {
        let mut builder = match self.runtime_type {
            TokioRuntimeType::CurrentThread => ::tokio::runtime::Builder::new_current_thread(),
            TokioRuntimeType::MultiThread => ::tokio::runtime::Builder::new_multi_thread(),
        };

        // catalog requests need both timers (throttling, delays) and IO
        builder.enable_time();
        builder.enable_io();

        let thread_counter = Arc::new(AtomicUsize::new(1));
        let name = name.to_owned();
        builder.thread_name_fn(move || {
            format!(
                "Metastore Tokio {} {}",
                name,
                thread_counter.fetch_add(1, Ordering::SeqCst)
            )
        });

        let num_threads = match self.num_threads {
            None => std::thread::available_parallelism()?,
            Some(n) => n,
        };
        builder.worker_threads(num_threads.get());

        if let Some(x) = self.thread_keep_alive {
            builder.thread_keep_alive(x);
        }

        #[allow(unused)]
        if let Some(x) = self.thread_priority {
            #[cfg(unix)]
            {
                builder.on_thread_start(move || set_current_thread_priority(x));
            }
            #[cfg(not(unix))]
            {
                tracing::warn!("Setting worker thread priority not supported on this platform");
            }
        }

        Ok(builder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use clap::Parser;
    use std::{ffi::OsString, future::Future};

    #[test]
    fn test_defaults() {
        let config = TokioWorkerConfig::parse_from(std::iter::empty::<OsString>());
        assert_eq!(config.num_threads, None);
        assert_eq!(config.runtime_type, TokioRuntimeType::MultiThread);
        assert_eq!(config.thread_keep_alive, None);
        assert_eq!(config.thread_priority, None);
    }

    #[test]
    fn test_parse_flags() {
        let config = TokioWorkerConfig::parse_from([
            "prog",
            "--num-catalog-threads",
            "3",
            "--catalog-runtime-type",
            "current-thread",
            "--catalog-runtime-thread-keep-alive",
            "15s",
        ]);
        assert_eq!(config.num_threads, NonZeroUsize::new(3));
        assert_eq!(config.runtime_type, TokioRuntimeType::CurrentThread);
        assert_eq!(config.thread_keep_alive, Some(Duration::from_secs(15)));
    }

    #[test]
    fn test_thread_name() {
        assert_runtime_thread_property(
            TokioWorkerConfig::parse_from(std::iter::empty::<OsString>())
                .builder()
                .unwrap(),
            || {
                assert_thread_name("Metastore Tokio catalog");
            },
        );
        assert_runtime_thread_property(
            TokioWorkerConfig::parse_from(std::iter::empty::<OsString>())
                .builder_with_name("foo")
                .unwrap(),
            || {
                assert_thread_name("Metastore Tokio foo");
            },
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_thread_priority() {
        assert_runtime_thread_property(
            TokioWorkerConfig::parse_from(["prog", "--catalog-runtime-thread-priority", "10"])
                .builder()
                .unwrap(),
            || {
                assert_eq!(get_current_thread_priority(), 10);
            },
        );
    }

    #[track_caller]
    fn assert_runtime_thread_property<F>(builder: ::tokio::runtime::Builder, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        assert_runtime_thread_property_async(builder, || async move { f() });
    }

    #[track_caller]
    fn assert_runtime_thread_property_async<F, Fut>(mut builder: ::tokio::runtime::Builder, f: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let rt = builder.build().unwrap();
        rt.block_on(async move {
            ::tokio::spawn(async move { f().await }).await.unwrap();
        });
    }

    #[cfg(unix)]
    fn get_current_thread_priority() -> i32 {
        unsafe { libc::getpriority(0, 0) }
    }

    #[track_caller]
    fn assert_thread_name(prefix: &'static str) {
        let thread = std::thread::current();
        let tname = thread.name().expect("thread is named");

        assert!(tname.starts_with(prefix), "Invalid thread name: {tname}",);
    }
}
