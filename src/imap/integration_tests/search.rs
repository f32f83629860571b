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

use super::defs::*;
use crate::account::model::Flag;

fn search(client: &mut PipeClient, criteria: &str) -> String {
    let lines = ok_command(client, &format!("SEARCH {}", criteria));
    let hits = matching(&lines, r"^\* SEARCH");
    assert_eq!(1, hits.len(), "Bad response to {}: {:?}", criteria, lines);
    hits[0].to_owned()
}

#[test]
fn unseen_recent_or_content() {
    let setup = set_up();
    let archive = [
        ("memo", "plain text", vec![Flag::Seen]),
        ("leaves", "mostly green", vec![Flag::Seen]),
        ("paint", "green and blue", vec![]),
    ];
    for &(subject, body, ref flags) in &archive {
        setup
            .store
            .deliver("azure", "Archive", flags, &message(subject, body));
    }

    let mut client = setup.connect("search_unseen_recent_or_content");
    quick_log_in(&mut client);
    quick_select(&mut client, "Archive");

    assert_eq!(
        "* SEARCH 2 3",
        search(&mut client, "OR (UNSEEN RECENT) BODY green")
    );
    assert_eq!(
        "* SEARCH 3",
        search(&mut client, "OR (UNSEEN RECENT) BODY nowhere")
    );
    let lines =
        ok_command(&mut client, "UID SEARCH OR (UNSEEN RECENT) BODY GREEN");
    assert_has_line(&lines, r"^\* SEARCH 2 3$");
}

#[test]
fn search_keys() {
    let setup = set_up();
    let archive = [
        ("quarterly report", "numbers are green", vec![Flag::Seen]),
        ("lunch", "tacos", vec![]),
        ("report draft", "numbers pending", vec![Flag::Flagged]),
        ("misc", "GREEN light", vec![Flag::Seen]),
    ];
    for &(subject, body, ref flags) in &archive {
        setup
            .store
            .deliver("azure", "Archive", flags, &message(subject, body));
    }

    let mut client = setup.connect("search_keys");
    quick_log_in(&mut client);
    quick_select(&mut client, "Archive");

    assert_eq!("* SEARCH 1 2 3 4", search(&mut client, "ALL"));
    assert_eq!("* SEARCH 1 4", search(&mut client, "SEEN"));
    assert_eq!("* SEARCH 2 3", search(&mut client, "UNSEEN"));
    assert_eq!("* SEARCH 1 3", search(&mut client, "SUBJECT report"));
    assert_eq!("* SEARCH 1 4", search(&mut client, "BODY green"));
    assert_eq!("* SEARCH 1 3 4", search(&mut client, "OR FLAGGED SEEN"));
    assert_eq!("* SEARCH 4", search(&mut client, "NOT SUBJECT report SEEN"));
    assert_eq!(
        "* SEARCH 2",
        search(&mut client, "CHARSET UTF-8 TEXT \"TACOS\"")
    );
    assert_eq!("* SEARCH", search(&mut client, "SUBJECT \"nothing here\""));
    assert_eq!("* SEARCH 2 3", search(&mut client, "2:3 RECENT"));

    let lines = client.command("SEARCH CHARSET KOI8-R ALL").unwrap();
    assert_completion(&lines, r"^NO \[CANNOT\]");
    let lines = client.command("SEARCH FROB").unwrap();
    assert_completion(&lines, r"^BAD ");
    let lines = client.command("SEARCH").unwrap();
    assert_completion(&lines, r"^BAD ");
    let lines = client.command("SEARCH 5:6").unwrap();
    assert_completion(&lines, r"^BAD ");
    let lines = client.command("SEARCH LARGER lots").unwrap();
    assert_completion(&lines, r"^BAD ");
}

#[test]
fn search_after_expunge() {
    let setup = set_up();
    for subject in &["report one", "lunch", "report two", "misc"] {
        setup
            .store
            .deliver("azure", "Archive", &[], &message(subject, "x"));
    }

    let mut client = setup.connect("search_expunge");
    quick_log_in(&mut client);
    quick_select(&mut client, "Archive");

    ok_command(&mut client, "STORE 2 +FLAGS.SILENT (\\Deleted)");
    ok_command(&mut client, "STORE 4 +FLAGS.SILENT (\\Seen)");
    ok_command(&mut client, "EXPUNGE");

    assert_eq!("* SEARCH 1 2", search(&mut client, "SUBJECT report"));
    let lines = ok_command(&mut client, "UID SEARCH SUBJECT report");
    assert_has_line(&lines, r"^\* SEARCH 1 3$");

    // Sequence sets in the criteria follow the new numbering
    assert_eq!("* SEARCH 2", search(&mut client, "2"));
    assert_eq!("* SEARCH 2 3", search(&mut client, "UID 3:*"));
    assert_eq!("* SEARCH 3", search(&mut client, "(SEEN LARGER 1)"));
    let lines = client.command("SEARCH 4").unwrap();
    assert_completion(&lines, r"^BAD ");

    let lines = client.command("UID SEARCH 4").unwrap();
    assert_completion(&lines, r"^BAD ");
    let lines = ok_command(&mut client, "UID SEARCH UID 2:3");
    assert_has_line(&lines, r"^\* SEARCH 3$");
}
