// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! C4 — ParserPool: farm recipe files out to a bounded worker pool and
//! stream results back in order (spec.md §4.4). Mirrors the topology of
//! `cooker.py`'s `CookerParser`/`Feeder`/`Parser` trio: a feeder thread
//! pushes work into a bounded queue so the pool never buffers more jobs
//! than it can hold, and workers push results back as they finish.
//!
//! The original isolates each worker in its own OS process so a crashing
//! parse can't take the driver down with it. We use plain threads with
//! `catch_unwind` around each call instead — recipe parsing here is a
//! caller-supplied closure, not out-of-process Python, so there is no
//! interpreter state a panic could corrupt, and threads avoid the IPC
//! serialization the original pays for every result (documented
//! deviation, see DESIGN.md).

use std::{
    collections::VecDeque,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{sync_channel, Receiver, Sender, SyncSender},
        Arc, Mutex,
    },
    thread::JoinHandle,
};

use camino::Utf8PathBuf;

use crate::{
    event::{CookerEvent, EventSink, ParseCompletedCounts},
    recipe::{RecipeInfo, VirtualFn},
};

pub type ParseFn = Arc<dyn Fn(&Utf8PathBuf) -> Result<Vec<(VirtualFn, RecipeInfo)>, String> + Send + Sync>;
pub type CacheCheckFn = Arc<dyn Fn(&Utf8PathBuf) -> Option<Vec<(VirtualFn, RecipeInfo)>> + Send + Sync>;

#[derive(Debug, Clone)]
pub enum ParseOutcome {
    Cached {
        path: Utf8PathBuf,
        infos: Vec<(VirtualFn, RecipeInfo)>,
    },
    Parsed {
        path: Utf8PathBuf,
        infos: Vec<(VirtualFn, RecipeInfo)>,
    },
    Failed {
        path: Utf8PathBuf,
        message: String,
    },
}

enum WorkerMsg {
    Job(Utf8PathBuf),
}

struct WorkerResult {
    path: Utf8PathBuf,
    result: Result<Vec<(VirtualFn, RecipeInfo)>, String>,
}

/// Every file to parse, split ahead of time into what's already valid in
/// the on-disk cache versus what needs a live worker (spec.md §4.4
/// `cacheValid`/`fromcache`/`willparse` split).
pub struct ParserPool {
    cached: VecDeque<ParseOutcome>,
    result_rx: Receiver<WorkerResult>,
    _feeder: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
    force: Arc<AtomicBool>,
    total: usize,
    emitted: usize,
    inflight: usize,
    progress_stride: usize,
    masked: usize,
    cached_count: usize,
    parsed_count: usize,
    skipped_count: usize,
    virtuals_count: usize,
    error_count: usize,
}

impl ParserPool {
    /// `num_workers` threads pull from a queue of capacity `num_workers`
    /// (the original's bounded multiprocessing queue) filled by a
    /// dedicated feeder thread so pool construction never blocks the
    /// caller (spec.md §4.4). `masked` is the count of files the collector
    /// already excluded via `BBMASK` before they ever reached this pool —
    /// carried through so the completion counts (spec.md §4.4) can report
    /// it alongside `cached`/`parsed`/`errors`.
    pub fn new(files: Vec<Utf8PathBuf>, num_workers: usize, masked: usize, cache_check: CacheCheckFn, parse: ParseFn) -> Self {
        let num_workers = num_workers.max(1);
        let total = files.len();

        let mut cached = VecDeque::new();
        let mut willparse = Vec::new();
        for path in files {
            match cache_check(&path) {
                Some(infos) => cached.push_back(ParseOutcome::Cached { path, infos }),
                None => willparse.push(path),
            }
        }

        let (job_tx, job_rx): (SyncSender<WorkerMsg>, Receiver<WorkerMsg>) = sync_channel(num_workers);
        let (result_tx, result_rx): (Sender<WorkerResult>, Receiver<WorkerResult>) = std::sync::mpsc::channel();
        let job_rx = Arc::new(Mutex::new(job_rx));
        let force = Arc::new(AtomicBool::new(false));

        let feeder = {
            let force = Arc::clone(&force);
            std::thread::Builder::new()
                .name("parser-feeder".into())
                .spawn(move || {
                    for path in willparse {
                        if force.load(Ordering::Relaxed) {
                            break;
                        }
                        if job_tx.send(WorkerMsg::Job(path)).is_err() {
                            break;
                        }
                    }
                })
                .expect("spawn parser feeder thread")
        };

        let workers = (0..num_workers)
            .map(|index| {
                let job_rx = Arc::clone(&job_rx);
                let result_tx = result_tx.clone();
                let parse = Arc::clone(&parse);
                let force = Arc::clone(&force);
                std::thread::Builder::new()
                    .name(format!("parser-worker-{index}"))
                    .spawn(move || worker_loop(job_rx, result_tx, parse, force))
                    .expect("spawn parser worker thread")
            })
            .collect();

        Self {
            cached,
            result_rx,
            _feeder: feeder,
            workers,
            force,
            total,
            emitted: 0,
            inflight: total,
            progress_stride: (total / 100).max(1),
            masked,
            cached_count: 0,
            parsed_count: 0,
            skipped_count: 0,
            virtuals_count: 0,
            error_count: 0,
        }
    }

    /// Pull the next outcome, cached results first, then parsed results as
    /// workers complete them — same visible order the original's
    /// `parse_next` generator yields. Emits throttled progress and a
    /// final `ParseCompleted` once every file has been accounted for.
    pub fn parse_next(&mut self, sink: &EventSink) -> Option<ParseOutcome> {
        if self.emitted == 0 {
            sink.emit(CookerEvent::ParseStarted { total: self.total });
        }

        let outcome = if let Some(outcome) = self.cached.pop_front() {
            Some(outcome)
        } else {
            self.result_rx.recv().ok().map(|result| match result.result {
                Ok(infos) => ParseOutcome::Parsed { path: result.path, infos },
                Err(message) => ParseOutcome::Failed { path: result.path, message },
            })
        };

        if let Some(outcome) = &outcome {
            self.emitted += 1;
            self.tally(outcome);

            if self.emitted == self.total || self.emitted % self.progress_stride == 0 {
                sink.emit(CookerEvent::ParseProgress {
                    current: self.emitted,
                    total: self.total,
                });
            }
            if self.emitted == self.total {
                sink.emit(CookerEvent::ParseCompleted(self.counts()));
            }
        }

        outcome
    }

    /// Update the running counts by one outcome — cache hits and fresh
    /// parses both contribute `skipped`/`virtuals` from the `RecipeInfo`
    /// variants they carried (spec.md §4.4 completion counts).
    fn tally(&mut self, outcome: &ParseOutcome) {
        match outcome {
            ParseOutcome::Cached { infos, .. } => {
                self.cached_count += 1;
                self.skipped_count += infos.iter().filter(|(_, info)| info.skipped).count();
                self.virtuals_count += infos.iter().filter(|(virt, _)| virt.class().is_some()).count();
            }
            ParseOutcome::Parsed { infos, .. } => {
                self.parsed_count += 1;
                self.skipped_count += infos.iter().filter(|(_, info)| info.skipped).count();
                self.virtuals_count += infos.iter().filter(|(virt, _)| virt.class().is_some()).count();
            }
            ParseOutcome::Failed { .. } => {
                self.error_count += 1;
            }
        }
    }

    fn counts(&self) -> ParseCompletedCounts {
        ParseCompletedCounts {
            cached: self.cached_count,
            parsed: self.parsed_count,
            skipped: self.skipped_count,
            masked: self.masked,
            virtuals: self.virtuals_count,
            errors: self.error_count,
            total: self.total,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.emitted >= self.inflight
    }

    /// `clean`: let in-flight jobs finish, stop handing out new ones.
    /// `force`: stop handing out new jobs immediately and don't wait for
    /// workers beyond joining them (spec.md §4.4 `shutdown(clean, force)`,
    /// idempotent — a second call is a no-op since the flag is already
    /// set and the threads already joined).
    pub fn shutdown(&mut self, force: bool) {
        if force {
            self.force.store(true, Ordering::Relaxed);
        }
        self.cached.clear();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(job_rx: Arc<Mutex<Receiver<WorkerMsg>>>, result_tx: Sender<WorkerResult>, parse: ParseFn, force: Arc<AtomicBool>) {
    loop {
        if force.load(Ordering::Relaxed) {
            return;
        }

        let job = {
            let guard = job_rx.lock().expect("parser job queue poisoned");
            guard.recv()
        };

        let WorkerMsg::Job(path) = match job {
            Ok(job) => job,
            Err(_) => return,
        };

        let result = match catch_unwind(AssertUnwindSafe(|| parse(&path))) {
            Ok(result) => result,
            Err(_) => Err(format!("parser panicked while parsing {path}")),
        };

        if result_tx.send(WorkerResult { path, result }).is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use super::*;
    use crate::recipe::realfn_to_virtual;

    fn no_cache() -> CacheCheckFn {
        Arc::new(|_: &Utf8PathBuf| None)
    }

    #[test]
    fn parses_every_file_exactly_once() {
        let files = vec![
            Utf8PathBuf::from("/a/foo_1.0.bb"),
            Utf8PathBuf::from("/a/bar_1.0.bb"),
            Utf8PathBuf::from("/a/baz_1.0.bb"),
        ];
        let parse: ParseFn = Arc::new(|path| {
            let virt = realfn_to_virtual(camino::Utf8Path::new(path.as_str()), None);
            Ok(vec![(virt, RecipeInfo::new(path.file_stem().unwrap_or_default()))])
        });

        let (tx, rx) = std::sync::mpsc::channel();
        let sink = EventSink::new(tx);
        let mut pool = ParserPool::new(files.clone(), 2, 0, no_cache(), parse);

        let mut seen = vec![];
        while let Some(outcome) = pool.parse_next(&sink) {
            match outcome {
                ParseOutcome::Parsed { path, .. } | ParseOutcome::Cached { path, .. } => seen.push(path),
                ParseOutcome::Failed { path, .. } => seen.push(path),
            }
            if seen.len() == files.len() {
                break;
            }
        }
        pool.shutdown(false);

        seen.sort();
        let mut expected = files;
        expected.sort();
        assert_eq!(seen, expected);

        drop(rx);
        let _ = StdMutex::new(());
    }

    #[test]
    fn cached_files_skip_the_worker_pool() {
        let files = vec![Utf8PathBuf::from("/a/foo_1.0.bb")];
        let cached_infos = vec![(realfn_to_virtual(camino::Utf8Path::new("/a/foo_1.0.bb"), None), RecipeInfo::new("foo"))];
        let cache_check: CacheCheckFn = {
            let infos = cached_infos.clone();
            Arc::new(move |_| Some(infos.clone()))
        };
        let parse: ParseFn = Arc::new(|_| panic!("should never be called for a cache hit"));

        let (tx, _rx) = std::sync::mpsc::channel();
        let sink = EventSink::new(tx);
        let mut pool = ParserPool::new(files, 1, 0, cache_check, parse);

        let outcome = pool.parse_next(&sink).unwrap();
        assert!(matches!(outcome, ParseOutcome::Cached { .. }));
        pool.shutdown(false);
    }

    #[test]
    fn completion_counts_reflect_what_actually_happened() {
        let files = vec![Utf8PathBuf::from("/a/foo_1.0.bb"), Utf8PathBuf::from("/a/bad.bb")];
        let parse: ParseFn = Arc::new(|path| {
            if path.as_str().ends_with("bad.bb") {
                return Err("broken recipe".to_string());
            }
            let virt = realfn_to_virtual(camino::Utf8Path::new(path.as_str()), Some("native"));
            let mut info = RecipeInfo::new("foo");
            info.skipped = true;
            Ok(vec![(virt, info)])
        });

        let (tx, rx) = std::sync::mpsc::channel();
        let sink = EventSink::new(tx);
        let mut pool = ParserPool::new(files.clone(), 1, 3, no_cache(), parse);

        while pool.parse_next(&sink).is_some() {}
        pool.shutdown(false);

        let counts = loop {
            match rx.try_recv() {
                Ok(CookerEvent::ParseCompleted(counts)) => break counts,
                Ok(_) => continue,
                Err(_) => panic!("ParseCompleted was never emitted"),
            }
        };

        assert_eq!(counts.parsed, 1);
        assert_eq!(counts.skipped, 1);
        assert_eq!(counts.virtuals, 1);
        assert_eq!(counts.errors, 1);
        assert_eq!(counts.masked, 3);
        assert_eq!(counts.total, files.len());
    }

    #[test]
    fn a_panicking_parse_is_reported_not_propagated() {
        let files = vec![Utf8PathBuf::from("/a/broken.bb")];
        let parse: ParseFn = Arc::new(|_| panic!("boom"));

        let (tx, _rx) = std::sync::mpsc::channel();
        let sink = EventSink::new(tx);
        let mut pool = ParserPool::new(files, 1, 0, no_cache(), parse);

        let outcome = pool.parse_next(&sink).unwrap();
        assert!(matches!(outcome, ParseOutcome::Failed { .. }));
        pool.shutdown(false);
    }
}
