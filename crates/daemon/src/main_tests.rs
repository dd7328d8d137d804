// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Flag parsing tests.

use super::*;

fn flags_of(args: &[&str]) -> Flags {
    parse_flags(args.iter().map(|s| s.to_string()))
}

#[test]
fn no_arguments_means_defaults() {
    let flags = flags_of(&[]);
    assert!(!flags.debug);
    assert!(!flags.verbose);
    assert!(!flags.single_user);
    assert!(!flags.safe_boot);
}

#[test]
fn individual_flags() {
    assert!(flags_of(&["-d"]).debug);
    assert!(flags_of(&["-v"]).verbose);
    assert!(flags_of(&["-s"]).single_user);
    assert!(flags_of(&["-x"]).safe_boot);
}

#[test]
fn combined_and_repeated_flags() {
    let flags = flags_of(&["-dv", "-x"]);
    assert!(flags.debug);
    assert!(flags.verbose);
    assert!(flags.safe_boot);
    assert!(!flags.single_user);
}

#[test]
fn unknown_options_do_not_stop_parsing() {
    let flags = flags_of(&["-z", "-d"]);
    assert!(flags.debug);
}

#[test]
fn non_option_arguments_are_ignored() {
    let flags = flags_of(&["bogus", "-v"]);
    assert!(flags.verbose);
}

#[test]
fn usage_lists_every_flag() {
    let mut out = Vec::new();
    usage(&mut out);
    let text = String::from_utf8(out).unwrap();
    for flag in ["-d", "-s", "-v", "-x", "-h"] {
        assert!(text.contains(flag), "usage must mention {flag}");
    }
}
