#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::plugin::PluginSignal;
    use crate::state::Metrics;
    use crate::storage::MemoryStore;
    use crate::test_utils::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::broadcast;
    use tokio::time::Instant;

    struct Harness {
        worker: WorkerSupervisor,
        store: Arc<MemoryStore>,
        metrics: Arc<Metrics>,
        shutdown_tx: broadcast::Sender<()>,
    }

    fn harness(
        plugin: Arc<PluginDescriptor>,
        spawner: Arc<ScriptedSpawner>,
        extensions: bool,
    ) -> Harness {
        let store = MemoryStore::new();
        let metrics = Arc::new(Metrics::new());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(4);
        let worker = WorkerSupervisor::new(
            plugin,
            spawner,
            store.clone(),
            metrics.clone(),
            shutdown_rx,
        )
        .with_extensions(extensions);
        Harness {
            worker,
            store,
            metrics,
            shutdown_tx,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_productive_run_restarts_after_one_interval() {
        let plugin = test_descriptor("apps", 1);
        let spawner = ScriptedSpawner::new(vec![
            ScriptedRun::lines(&productive_lines()),
            ScriptedRun::lines(&productive_lines()),
        ]);
        let h = harness(plugin.clone(), spawner.clone(), false);

        h.worker.run().await;

        let spawns = spawner.spawns();
        assert_eq!(spawns.len(), 2);
        assert_eq!(spawns[1].at - spawns[0].at, Duration::from_secs(1));
        assert_eq!(spawns[0].command.update_every, 1);

        let chart = h.store.chart("test.chart").unwrap();
        assert_eq!(chart.completed_intervals, 2);
        assert_eq!(h.metrics.samples_total.get(), 2);
        assert_eq!(h.metrics.spawns_total.get(), 2);
        // The queue ran dry, so the third spawn failed.
        assert_eq!(h.metrics.spawn_failures_total.get(), 1);

        assert!(plugin.is_enabled());
        assert!(plugin.is_obsolete());
        assert_eq!(plugin.pid(), None);
        assert_eq!(plugin.state(), WorkerState::Terminated);
        drop(h.shutdown_tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_chart_interval_is_capped_for_backoff() {
        let plugin = test_descriptor("greedy", 1);
        let spawner = ScriptedSpawner::new(vec![
            ScriptedRun::lines(&["CHART a.b '' '' '' '' '' line 1000 99999999999999999999"]),
            ScriptedRun::lines(&productive_lines()),
        ]);
        let h = harness(plugin.clone(), spawner.clone(), false);

        h.worker.run().await;

        let max = crate::config::MAX_UPDATE_EVERY;
        assert_eq!(plugin.update_every(), max);
        assert_eq!(h.store.chart("a.b").unwrap().definition.update_every, max);

        let spawns = spawner.spawns();
        assert_eq!(spawns.len(), 2);
        assert_eq!(
            spawns[1].at - spawns[0].at,
            Duration::from_secs(max) * UNPRODUCTIVE_BACKOFF
        );
        assert_eq!(h.metrics.unproductive_runs_total.get(), 1);
        assert!(plugin.is_enabled());
        assert!(plugin.is_obsolete());
        assert_eq!(plugin.state(), WorkerState::Terminated);
        drop(h.shutdown_tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unproductive_run_backs_off_ten_intervals() {
        let plugin = test_descriptor("quiet", 1);
        let spawner = ScriptedSpawner::new(vec![
            ScriptedRun::lines(&["CHART test.chart", "DIMENSION x"]),
            ScriptedRun::lines(&productive_lines()),
        ]);
        let h = harness(plugin.clone(), spawner.clone(), false);

        h.worker.run().await;

        let spawns = spawner.spawns();
        assert_eq!(spawns.len(), 2);
        assert_eq!(spawns[1].at - spawns[0].at, Duration::from_secs(10));
        assert_eq!(h.metrics.unproductive_runs_total.get(), 1);
        assert!(plugin.is_enabled());
        drop(h.shutdown_tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_chart_update_every_changes_the_restart_interval() {
        let plugin = test_descriptor("slow", 1);
        let spawner = ScriptedSpawner::new(vec![
            ScriptedRun::lines(&[
                "CHART test.chart '' 'Slow chart' units family category line 1000 3",
                "DIMENSION x",
                "BEGIN test.chart",
                "SET x = 7",
                "END",
            ]),
            ScriptedRun::lines(&productive_lines()),
        ]);
        let h = harness(plugin.clone(), spawner.clone(), false);

        h.worker.run().await;

        let spawns = spawner.spawns();
        assert_eq!(spawns[1].at - spawns[0].at, Duration::from_secs(3));
        assert_eq!(plugin.update_every(), 3);
        drop(h.shutdown_tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_violation_disables_and_never_respawns() {
        let plugin = test_descriptor("broken", 1);
        let spawner = ScriptedSpawner::new(vec![
            ScriptedRun::hang(&["BEGIN unknown.chart"]),
            ScriptedRun::lines(&productive_lines()),
        ]);
        let h = harness(plugin.clone(), spawner.clone(), false);

        h.worker.run().await;

        assert_eq!(spawner.spawn_count(), 1);
        let signals = spawner.signals();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].pid, 1000);
        assert_eq!(signals[0].signal, PluginSignal::Terminate);

        assert!(!plugin.is_enabled());
        assert!(plugin.is_obsolete());
        assert_eq!(plugin.state(), WorkerState::Terminated);
        assert_eq!(h.store.chart_count(), 0);
        assert_eq!(h.metrics.protocol_violations_total.get(), 1);
        drop(h.shutdown_tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_command_stops_the_plugin() {
        let plugin = test_descriptor("done", 1);
        let spawner = ScriptedSpawner::new(vec![
            ScriptedRun::hang(&["CHART test.chart", "DISABLE"]),
            ScriptedRun::lines(&productive_lines()),
        ]);
        let h = harness(plugin.clone(), spawner.clone(), false);

        h.worker.run().await;

        assert_eq!(spawner.spawn_count(), 1);
        assert_eq!(spawner.signals()[0].signal, PluginSignal::Terminate);
        assert!(!plugin.is_enabled());
        assert_eq!(h.metrics.protocol_violations_total.get(), 0);
        assert_eq!(h.store.chart_count(), 1);
        drop(h.shutdown_tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_failure_terminates_but_keeps_plugin_enabled() {
        let plugin = test_descriptor("missing", 1);
        let spawner = ScriptedSpawner::new(vec![]);
        let h = harness(plugin.clone(), spawner.clone(), false);

        h.worker.run().await;

        assert_eq!(spawner.spawn_count(), 0);
        assert!(plugin.is_enabled());
        assert!(plugin.is_obsolete());
        assert_eq!(h.metrics.spawn_failures_total.get(), 1);
        drop(h.shutdown_tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extension_commands_are_unknown_by_default() {
        let plugin = test_descriptor("pidful", 1);
        let spawner = ScriptedSpawner::new(vec![ScriptedRun::hang(&["MYPID 4242"])]);
        let h = harness(plugin.clone(), spawner.clone(), false);

        h.worker.run().await;

        assert!(!plugin.is_enabled());
        assert_eq!(spawner.signals()[0].pid, 1000);
        drop(h.shutdown_tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mypid_redirects_signals() {
        let plugin = test_descriptor("pidful", 1);
        let spawner = ScriptedSpawner::new(vec![ScriptedRun::hang(&["MYPID 4242", "NOPE"])]);
        let h = harness(plugin.clone(), spawner.clone(), true);

        h.worker.run().await;

        let signals = spawner.signals();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].pid, 4242);
        assert_eq!(signals[0].signal, PluginSignal::Terminate);
        assert_eq!(plugin.pid(), None);
        drop(h.shutdown_tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_wakes_plugin_on_schedule() {
        let plugin = test_descriptor("sleepy", 2);
        let spawner = ScriptedSpawner::new(vec![
            ScriptedRun::lines(&["STOPPING_WAKE_ME_UP_PLEASE"]),
            ScriptedRun::lines(&["STOPPING_WAKE_ME_UP_PLEASE"]),
        ]);
        let h = harness(plugin.clone(), spawner.clone(), true);
        let start = Instant::now();

        h.worker.run().await;

        let signals = spawner.signals();
        assert_eq!(signals.len(), 2);
        assert!(signals.iter().all(|s| s.signal == PluginSignal::Continue));
        // First pause sleeps a full interval, then the unproductive backoff
        // (20s) runs before the second spawn. The plugin "worked" for 20s, so
        // the second pause sleeps half an interval.
        assert_eq!(signals[0].at - start, Duration::from_secs(2));
        assert_eq!(signals[1].at - start, Duration::from_secs(23));
        assert!(plugin.is_enabled());
        drop(h.shutdown_tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_terminates_a_running_plugin() {
        let plugin = test_descriptor("forever", 1);
        let spawner = ScriptedSpawner::new(vec![ScriptedRun::hang(&productive_lines())]);
        let h = harness(plugin.clone(), spawner.clone(), false);

        let handle = tokio::spawn(h.worker.run());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(plugin.state(), WorkerState::Reading);
        assert_eq!(plugin.pid(), Some(1000));

        h.shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        let signals = spawner.signals();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].signal, PluginSignal::Terminate);
        assert!(plugin.is_enabled());
        assert!(plugin.is_obsolete());
        assert_eq!(plugin.state(), WorkerState::Terminated);
        assert_eq!(h.metrics.workers_running.get(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_backoff() {
        let plugin = test_descriptor("quiet", 1);
        let spawner = ScriptedSpawner::new(vec![
            ScriptedRun::lines(&[]),
            ScriptedRun::lines(&productive_lines()),
        ]);
        let h = harness(plugin.clone(), spawner.clone(), false);
        let start = Instant::now();

        let handle = tokio::spawn(h.worker.run());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(plugin.state(), WorkerState::Sleeping);

        h.shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        assert_eq!(spawner.spawn_count(), 1);
        assert!(Instant::now() - start < Duration::from_secs(10));
        assert!(plugin.is_obsolete());
    }

    #[test]
    fn test_wake_schedule_first_pause_sleeps_one_interval() {
        let mut schedule = WakeSchedule::default();
        let now = Instant::now();
        assert_eq!(schedule.next_sleep(now, Duration::from_secs(4)), Duration::from_secs(4));
    }

    #[test]
    fn test_wake_schedule_subtracts_short_work() {
        let mut schedule = WakeSchedule::default();
        let start = Instant::now();
        let interval = Duration::from_secs(4);

        schedule.next_sleep(start, interval);
        // Slept 4s, then worked 1s.
        let next = schedule.next_sleep(start + Duration::from_secs(5), interval);
        assert_eq!(next, Duration::from_secs(3));
    }

    #[test]
    fn test_wake_schedule_long_work_sleeps_half_an_interval() {
        let mut schedule = WakeSchedule::default();
        let start = Instant::now();
        let interval = Duration::from_secs(4);

        schedule.next_sleep(start, interval);
        // Slept 4s, then worked 3s.
        let next = schedule.next_sleep(start + Duration::from_secs(7), interval);
        assert_eq!(next, Duration::from_secs(2));
    }

    #[test]
    fn test_worker_state_round_trips_through_u8() {
        for state in [
            WorkerState::Spawning,
            WorkerState::Reading,
            WorkerState::Draining,
            WorkerState::Sleeping,
            WorkerState::Terminated,
        ] {
            assert_eq!(WorkerState::from_u8(state as u8), state);
        }
        assert_eq!(WorkerState::from_u8(200), WorkerState::Terminated);
    }
}
