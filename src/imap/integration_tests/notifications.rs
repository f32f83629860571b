//-
// Copyright (c) 2026, Mailfront Developers
//
// This file is part of Mailfront.
//
// Mailfront is free software: you can  redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Mailfront is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Mailfront. If not, see <http://www.gnu.org/licenses/>.

use std::thread;
use std::time::Duration;

use super::defs::*;
use crate::account::snapshot_cache::CacheKey;
use crate::account::store::MailboxStore;

#[test]
fn changes_reach_other_sessions() {
    let setup = set_up();
    setup
        .store
        .deliver("azure", "Archive", &[], &message("first", "one"));

    let mut watcher = setup.connect("notify_watcher");
    quick_log_in(&mut watcher);
    quick_select(&mut watcher, "Archive");
    let mut actor = setup.connect("notify_actor");
    quick_log_in(&mut actor);
    quick_select(&mut actor, "Archive");

    ok_command(&mut actor, "STORE 1 +FLAGS.SILENT (\\Flagged)");
    poll_until(&mut watcher, r"^\* 1 FETCH \(UID 1 FLAGS \(\\Flagged");

    let lines = append(&mut actor, "Archive", "", &message("second", "two"));
    assert_ok(&lines);
    poll_until(&mut watcher, r"^\* 2 EXISTS$");
    // The appending session learns of its own message the same way
    poll_until(&mut actor, r"^\* 2 EXISTS$");

    setup
        .store
        .deliver("azure", "Archive", &[], &message("third", "three"));
    poll_until(&mut watcher, r"^\* 3 EXISTS$");
}

#[test]
fn expunge_waits_for_renumbering_point() {
    let setup = set_up();
    for subject in &["first", "second"] {
        setup
            .store
            .deliver("azure", "Archive", &[], &message(subject, "x"));
    }

    let mut watcher = setup.connect("expunge_watcher");
    quick_log_in(&mut watcher);
    quick_select(&mut watcher, "Archive");
    let mut actor = setup.connect("expunge_actor");
    quick_log_in(&mut actor);
    quick_select(&mut actor, "Archive");

    ok_command(&mut actor, "STORE 1 +FLAGS.SILENT (\\Deleted)");
    let lines = ok_command(&mut actor, "EXPUNGE");
    assert_has_line(&lines, r"^\* 1 EXPUNGE$");

    // Sequence-number FETCH may not renumber, so the expunged message
    // keeps its number and simply stops showing up.
    let mut caught_up = false;
    for _ in 0..100 {
        let lines = ok_command(&mut watcher, "FETCH 1:* UID");
        assert_no_line(&lines, "EXPUNGE");
        if 1 == matching(&lines, "FETCH").len() {
            assert_has_line(&lines, r"^\* 2 FETCH \(UID 2\)$");
            caught_up = true;
            break;
        }
        thread::sleep(Duration::from_millis(20));
    }
    assert!(caught_up);

    let lines = ok_command(&mut watcher, "NOOP");
    assert_has_line(&lines, r"^\* 1 EXPUNGE$");
    let lines = ok_command(&mut watcher, "FETCH 1 UID");
    assert_has_line(&lines, r"^\* 1 FETCH \(UID 2\)$");
}

#[test]
fn snapshot_written_back_on_logout() {
    let setup = set_up();
    for subject in &["first", "second", "third"] {
        setup
            .store
            .deliver("azure", "Archive", &[], &message(subject, "x"));
    }
    let archive = setup
        .store
        .folder_by_path("azure", "Archive")
        .unwrap()
        .unwrap();
    let key = CacheKey::for_folder(&archive);
    assert!(setup.services.cache.get(&key).is_none());

    let mut client = setup.connect("cache_logout");
    quick_log_in(&mut client);
    quick_select(&mut client, "Archive");
    let lines = ok_command(&mut client, "LOGOUT");
    assert_has_line(&lines, r"^\* BYE");

    let cached = setup.services.cache.get(&key).unwrap();
    assert_eq!(3, cached.num_messages());

    // The next session loads from the cache and sees the same folder
    let mut client = setup.connect("cache_reload");
    quick_log_in(&mut client);
    let lines = quick_select(&mut client, "Archive");
    assert_has_line(&lines, r"^\* 3 EXISTS$");
    let lines = ok_command(&mut client, "FETCH 1:* UID");
    assert_has_line(&lines, r"^\* 3 FETCH \(UID 3\)$");
}

#[test]
fn snapshot_discarded_on_disconnect() {
    let setup = set_up();
    setup
        .store
        .deliver("azure", "INBOX", &[], &message("first", "x"));
    let inbox = setup.store.folder_by_path("azure", "INBOX").unwrap().unwrap();
    let key = CacheKey::for_folder(&inbox);

    let mut client = setup.connect("cache_disconnect");
    quick_log_in(&mut client);
    quick_select(&mut client, "INBOX");
    drop(client);

    thread::sleep(Duration::from_millis(100));
    assert!(setup.services.cache.get(&key).is_none());
}
