use vela::timeman::TimeManager;

#[test]
fn hard_limits_are_hard() {
    let mut tm = TimeManager::new();
    tm.reset();
    tm.set_node_limit(1000);
    assert!(tm.can_continue(999));
    assert!(!tm.can_continue(1000));
    assert!(!tm.can_continue(5000));
}

#[test]
fn stop_flag_wins_over_everything() {
    let mut tm = TimeManager::new();
    tm.reset();
    assert!(tm.can_continue(0));
    tm.stop();
    assert!(tm.is_stopped());
    assert!(!tm.can_continue(0));
    assert!(!tm.can_start_iteration(0));
}

#[test]
fn movetime_zero_stops_immediately() {
    let mut tm = TimeManager::new();
    tm.reset();
    tm.set_move_time_limit(0);
    assert!(!tm.can_continue(0));
}

#[test]
fn clock_budgets_are_sane() {
    let mut tm = TimeManager::new();
    tm.reset();
    tm.set_time_limit(60_000, 600, 0, 20);

    let budget = tm.time_limit;
    assert!(budget.enabled);
    assert!(budget.optimal >= 1);
    assert!(budget.max >= budget.optimal);
    // Never plan to burn more than 70% of the clock in one move.
    assert!(budget.max <= 42_000);
}

#[test]
fn more_time_never_shrinks_the_optimal_budget() {
    let mut last = 0;
    for time in [1_000u64, 5_000, 20_000, 60_000, 300_000] {
        let mut tm = TimeManager::new();
        tm.reset();
        tm.set_time_limit(time, 0, 0, 30);
        let optimal = tm.time_limit.optimal;
        assert!(
            optimal >= last,
            "optimal {} at {}ms after {} before",
            optimal,
            time,
            last
        );
        last = optimal;
    }
}

#[test]
fn known_movestogo_spreads_the_clock() {
    let mut tm = TimeManager::new();
    tm.reset();
    tm.set_time_limit(30_000, 0, 10, 40);

    let budget = tm.time_limit;
    // Roughly a tenth of the remaining time, not the whole clock.
    assert!(budget.optimal >= 1_000);
    assert!(budget.optimal <= 6_000);
}

#[test]
fn low_time_no_increment_compresses_the_horizon() {
    let mut tm = TimeManager::new();
    tm.reset();
    tm.set_time_limit(400, 0, 0, 60);

    // With 400 ms on the clock the budgets must leave something in reserve.
    assert!(tm.time_limit.max < 400);
}
