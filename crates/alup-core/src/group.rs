use std::sync::Mutex;

use alup_proto::{Color, Command, Frame};

use crate::error::{GroupError, SessionError};
use crate::session::Session;

/// A fan-out facade over N [`Session`]s (spec.md §4.4). Ordering is
/// caller-defined and stable — members are driven in the order they
/// were added.
pub struct Group {
    members: Vec<Session>,
    /// Per-member latency history, in completion order (SPEC_FULL.md §3,
    /// grounded in `original_source/tools/group_latency_test.py`). Worst-
    /// case group latency (spec.md §4.4) is derived from the *last*
    /// entry of each member's history, not stored separately.
    member_latency_history: Mutex<Vec<Vec<i64>>>,
}

impl Group {
    pub fn new() -> Self {
        Group { members: Vec::new(), member_latency_history: Mutex::new(Vec::new()) }
    }

    /// Adds a session to the group (spec.md §6 `Group.add`).
    pub fn add(&mut self, session: Session) {
        self.members.push(session);
        self.member_latency_history.lock().unwrap().push(Vec::new());
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Fans `frame` out to every member in parallel and joins on all of
    /// them (spec.md §5 "Group concurrency"). A member failing does not
    /// abort its siblings — every failure is collected into the returned
    /// [`GroupError`].
    pub fn send(&self, frame: Frame) -> Result<(), GroupError> {
        self.dispatch(|session| session.send(frame.clone()).map(|_| ()))
    }

    /// Convenience fan-out: pushes the same color buffer to every member
    /// (spec.md §6 `Group.send`/`set_colors`).
    pub fn set_colors(&self, colors: Vec<Color>) -> Result<(), GroupError> {
        self.send(Frame::with_colors(colors))
    }

    pub fn clear(&self) -> Result<(), GroupError> {
        let mut frame = Frame::new();
        frame.command = Command::Clear;
        self.send(frame)
    }

    /// Worst-member latency after the most recently completed dispatch
    /// (spec.md §4.4 `Group::latency`, §6 `Group.latency`).
    pub fn latency(&self) -> i64 {
        self.members.iter().map(Session::last_latency_ms).max().unwrap_or(0)
    }

    /// Per-member completed-latency history, in the order members were
    /// added (SPEC_FULL.md §3).
    pub fn member_latencies(&self) -> Vec<Vec<i64>> {
        self.member_latency_history.lock().unwrap().clone()
    }

    /// Disconnects every member, collecting errors rather than
    /// short-circuiting on the first one (spec.md §4.4).
    pub fn disconnect(&mut self) -> Result<(), GroupError> {
        let failures: Vec<(usize, SessionError)> = self
            .members
            .iter_mut()
            .enumerate()
            .filter_map(|(index, session)| session.disconnect().err().map(|err| (index, err)))
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(GroupError { failures })
        }
    }

    fn dispatch<F>(&self, op: F) -> Result<(), GroupError>
    where
        F: Fn(&Session) -> Result<(), SessionError> + Sync,
    {
        let results: Vec<(usize, Result<(), SessionError>)> = std::thread::scope(|scope| {
            let handles: Vec<_> = self
                .members
                .iter()
                .enumerate()
                .map(|(index, session)| {
                    let op = &op;
                    scope.spawn(move || (index, op(session)))
                })
                .collect();
            handles.into_iter().map(|h| h.join().expect("group member thread panicked")).collect()
        });

        let mut history = self.member_latency_history.lock().unwrap();
        let mut failures = Vec::new();
        for (index, result) in results {
            history[index].push(self.members[index].last_latency_ms());
            if let Err(err) = result {
                failures.push((index, err));
            }
        }
        drop(history);

        if failures.is_empty() {
            Ok(())
        } else {
            Err(GroupError { failures })
        }
    }
}

impl Default for Group {
    fn default() -> Self {
        Group::new()
    }
}
