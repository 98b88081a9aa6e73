// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::time::Duration;

#[test]
fn command_shape() {
    let cfg = DriverConfig {
        frequency: 11,
        duration: Duration::from_secs(60),
        ..Default::default()
    };
    let spec = command(&cfg, 321, Path::new("/t/321.collapsed"));
    assert_eq!(
        spec.display(),
        "py-spy record -p 321 -r 11 -d 60 --format raw --nonblocking -o /t/321.collapsed"
    );
}
