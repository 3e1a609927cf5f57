use fleet_core::{HostId, LaneId, RevisionId, RevisionWork, RevisionWorkId, WorkState};

fn unit(workhost: Option<i64>, lock_expires: Option<i64>, completed: bool) -> RevisionWork {
    RevisionWork {
        id: RevisionWorkId(1),
        lane_id: LaneId(1),
        host_id: HostId(1),
        revision_id: RevisionId(1),
        workhost_id: workhost.map(HostId),
        lock_expires,
        completed,
        state: WorkState::NotDone,
    }
}

#[test]
fn unclaimed_unit_is_held_by_nobody() {
    let rw = unit(None, None, false);
    assert!(rw.lease_expired(1_000));
    assert!(!rw.is_held_by(HostId(7), 1_000));
}

#[test]
fn owner_holds_until_the_deadline() {
    let rw = unit(Some(7), Some(5_000), false);
    assert!(rw.is_held_by(HostId(7), 1_000));
    assert!(rw.is_held_by(HostId(7), 5_000));
    assert!(!rw.is_held_by(HostId(8), 1_000));
}

#[test]
fn expired_lease_is_held_by_nobody() {
    let rw = unit(Some(7), Some(5_000), false);
    assert!(rw.lease_expired(5_001));
    assert!(!rw.is_held_by(HostId(7), 5_001));
}

#[test]
fn completed_unit_is_never_held() {
    let owned = unit(Some(7), Some(i64::MAX), true);
    assert!(!owned.is_held_by(HostId(7), 0));
}
