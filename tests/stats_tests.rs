//! Stat container behavior through the public API: JSON round-trips with
//! repr-string keys, io reduction, and schedule majority merging.

use fluidml::{IOStat, KStat, Layout, Schedule, ScheduleGroup};

fn l(dims: &[usize]) -> Layout {
    Layout(dims.to_vec())
}

#[test]
fn kstat_json_uses_repr_keys() {
    let mut kstat = KStat::new();
    kstat.insert("matmul", vec![l(&[0, 1]), l(&[1, 0])], 42.5);
    let text = kstat.dump().unwrap();
    assert!(text.contains("\"((0, 1), (1, 0))\""), "dump was {text}");
    assert_eq!(KStat::load(&text).unwrap(), kstat);
}

#[test]
fn kstat_round_trip_is_bit_exact() {
    let mut kstat = KStat::new();
    kstat.insert("a", vec![l(&[0])], 0.1 + 0.2);
    kstat.insert("a", vec![l(&[])], f64::MIN_POSITIVE);
    kstat.insert("b", vec![l(&[2, 0, 1]), l(&[0, 1, 2])], 1e9);
    let text = kstat.dump().unwrap();
    let back = KStat::load(&text).unwrap();
    assert_eq!(back, kstat);
    assert_eq!(back.dump().unwrap(), text);
}

#[test]
fn schedule_round_trip_is_bit_exact() {
    let mut schedule = Schedule::new();
    schedule.insert("%0", l(&[2, 0, 1]));
    schedule.insert("%arg0", l(&[]));
    let text = schedule.dump().unwrap();
    let back = Schedule::load(&text).unwrap();
    assert_eq!(back, schedule);
    assert_eq!(back.dump().unwrap(), text);
}

#[test]
fn iostat_round_trip() {
    let mut iostat = IOStat::new();
    iostat.insert("matmul", 100.25);
    iostat.insert("relu", 0.0);
    let text = iostat.dump().unwrap();
    assert_eq!(IOStat::load(&text).unwrap(), iostat);
}

#[test]
fn reduce_never_goes_negative() {
    let mut kstat = KStat::new();
    kstat.insert("k", vec![l(&[0, 1])], 5.0);
    kstat.insert("k", vec![l(&[1, 0])], 100.0);
    let mut iostat = IOStat::new();
    iostat.insert("k", 50.0);
    let reduced = kstat.reduce(&iostat);
    assert_eq!(reduced.cell("k", &[l(&[0, 1])]), Some(0.0));
    assert_eq!(reduced.cell("k", &[l(&[1, 0])]), Some(50.0));
}

#[test]
fn reduce_with_zero_iostat_is_idempotent() {
    let mut kstat = KStat::new();
    kstat.insert("k", vec![l(&[0])], 3.0);
    let mut zero = IOStat::new();
    zero.insert("k", 0.0);
    assert_eq!(kstat.reduce(&zero), kstat);
    assert_eq!(kstat.reduce(&zero).reduce(&zero), kstat);
}

#[test]
fn group_merge_resolves_disagreement_by_majority() {
    let mut group = ScheduleGroup::new();
    for layout in [&[0usize, 1][..], &[1, 0], &[1, 0]] {
        let mut schedule = Schedule::new();
        schedule.insert("%shared", l(layout));
        group.push(schedule);
    }
    let merged = group.merge();
    assert_eq!(merged.get("%shared"), Some(&l(&[1, 0])));
    assert_eq!(merged.len(), 1);
}
