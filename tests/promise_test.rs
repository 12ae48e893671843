#[cfg(test)]
mod tests {
    use promise_cell::{Context, DoubleResolution, Error, Promise, RunLoop, TimedResult};
    use rand::seq::SliceRandom;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::{thread, time::Duration};

    const PATIENCE: Duration = Duration::from_secs(5);

    #[test]
    fn test_promise_out() {
        let (promise, resolver) = Promise::<i32>::pending();

        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            resolver.resolve(42);
        });

        let result = promise.wait(PATIENCE).unwrap();
        assert_eq!(result, 42);
    }

    #[test]
    fn test_success_then_increments() {
        let promise = Promise::<i32>::success(42).then(|x| Ok(x + 1));
        assert_eq!(promise.wait(PATIENCE).unwrap(), 43);
    }

    #[test]
    fn test_failure_catch_recovers() {
        let promise = Promise::<i32>::failure(Error::other("Boom")).catch(|_| Ok(7));
        assert_eq!(promise.wait(PATIENCE).unwrap(), 7);
    }

    #[test]
    fn test_failure_skips_every_then() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (f, g) = (calls.clone(), calls.clone());
        let promise = Promise::<i32>::failure(Error::other("original"))
            .then(move |x| {
                f.fetch_add(1, Ordering::SeqCst);
                Ok(x)
            })
            .then(move |x| {
                g.fetch_add(1, Ordering::SeqCst);
                Ok(x)
            });
        let err = promise.wait(PATIENCE).unwrap_err();
        assert_eq!(err.to_string(), "original");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_double_resolution_hook_fires_once() {
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = reports.clone();
        let context = Context::default()
            .with_backtraces(true)
            .with_hook(move |report: &DoubleResolution| sink.lock().unwrap().push(report.clone()));
        let promise = context.promise::<&str, Error, _>(|resolver| {
            resolver.resolve("first");
            resolver.resolve("second");
        });

        assert_eq!(promise.wait(PATIENCE).unwrap(), "first");
        let reports = reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].original.backtrace().is_some());
        assert!(reports[0].violating.backtrace().is_some());
        assert_eq!(reports[0].violating.location().file(), file!());
    }

    #[test]
    fn test_all_empty_resolves_synchronously() {
        let joined = Promise::<i32>::all(Vec::new());
        assert!(joined.is_resolved());
        assert!(joined.wait(PATIENCE).unwrap().is_empty());
    }

    #[test]
    fn test_all_with_failure_yields_that_failure() {
        let joined = Promise::all([
            Promise::success(1),
            Promise::success(2),
            Promise::failure(Error::other("E")),
        ]);
        assert_eq!(joined.wait(PATIENCE).unwrap_err().to_string(), "E");
    }

    #[test]
    fn test_all_orders_by_input_not_completion() {
        let pairs: Vec<_> = (0..16).map(|_| Promise::<usize>::pending()).collect();
        let joined = Promise::all(pairs.iter().map(|(promise, _)| promise.clone()));

        let mut order: Vec<usize> = (0..pairs.len()).collect();
        order.shuffle(&mut rand::thread_rng());
        let resolvers: Vec<_> = pairs.into_iter().map(|(_, resolver)| resolver).collect();
        let handles: Vec<_> = order
            .into_iter()
            .map(|index| {
                let resolver = resolvers[index].clone();
                thread::spawn(move || resolver.resolve(index))
            })
            .collect();
        for handle in handles {
            handle.join().expect("The resolver thread has panicked");
        }

        assert_eq!(joined.wait(PATIENCE).unwrap(), (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn test_any_empty_fails() {
        let raced = Promise::<i32>::any(Vec::new());
        assert!(matches!(raced.wait(PATIENCE), Err(Error::EmptyInput)));
    }

    #[test]
    fn test_any_ignores_never_resolving() {
        let (never, _keep) = Promise::<i32>::pending();
        let raced = Promise::any([never, Promise::success(5)]);
        assert_eq!(raced.wait(PATIENCE).unwrap(), 5);
    }

    #[test]
    fn test_any_settles_once() {
        let fulfilled = Arc::new(AtomicUsize::new(0));
        let counter = fulfilled.clone();
        let raced = Promise::<()>::any([
            Promise::new(|resolver| resolver.resolve(())),
            Promise::new(|resolver| resolver.resolve(())),
        ])
        .then(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        raced.wait(PATIENCE).unwrap();
        assert_eq!(fulfilled.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_wait_times_out_before_late_resolution() {
        let (promise, resolver) = Promise::<i32>::pending();
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            resolver.resolve(1);
        });
        assert!(matches!(promise.wait(Duration::from_millis(10)), Err(Error::TimedOut)));
        producer.join().expect("The producer thread has panicked");
        assert_eq!(promise.wait(PATIENCE).unwrap(), 1);
    }

    #[test]
    fn test_late_continuation_fires_after_one_tick() {
        let run_loop = RunLoop::new();
        let context = Context::new(run_loop.clone());
        let promise = context.success::<i32, Error>(1);
        run_loop.run_until_idle();

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        promise.then(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        run_loop.run_once();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_resolve_only_constructor() {
        let promise = Promise::<String>::new_resolve_only(|resolve| {
            thread::spawn(move || resolve("🍓".into()));
        });
        assert_eq!(promise.wait(PATIENCE).unwrap(), "🍓");
    }

    #[test]
    fn test_spawned_on_run_loop_thread() {
        let run_loop = RunLoop::new();
        let driver = run_loop.clone();
        let loop_thread = thread::spawn(move || driver.run());

        let context = Context::new(run_loop.clone());
        let name = context.spawn(|| Ok::<_, Error>(thread::current().id()));
        let on_loop = name.wait(PATIENCE).unwrap();
        run_loop.stop();
        let loop_id = loop_thread.thread().id();
        loop_thread.join().expect("The run loop thread has panicked");
        assert_eq!(on_loop, loop_id);
    }

    #[test]
    fn test_with_lifetime() {
        let slow = Promise::<i32>::new(|resolver| {
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(200));
                resolver.resolve(1);
            });
        });
        let timed = slow.with_lifetime(Duration::from_millis(10));
        assert_eq!(timed.wait(PATIENCE).unwrap(), TimedResult::TimedOut);
        assert_eq!(slow.wait(PATIENCE).unwrap(), 1);
    }

    #[test]
    fn test_erased_race_against_timer() {
        let value = Promise::<String>::success("fast".into());
        let timer = Promise::<()>::after(Duration::from_secs(2));
        let raced = Promise::any([value.erase(), timer.erase()]);
        assert_eq!(raced.recover::<String>().wait(PATIENCE).unwrap(), "fast");
    }
}
