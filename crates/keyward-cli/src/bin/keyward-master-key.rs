//! Privileged helper run through `sudo` by the master-key broker.
//!
//! Prints the encoded master key with no trailing newline and nothing else on
//! stdout. Any failure goes to stderr with a non-zero exit status.

use std::{
    fs,
    io::{self, Write},
};

use anyhow::{bail, Context, Result};
use keyward_core::key::MASTER_KEY_PATH;
use zeroize::Zeroizing;

fn main() -> Result<()> {
    let contents = Zeroizing::new(
        fs::read_to_string(MASTER_KEY_PATH)
            .with_context(|| format!("cannot read master key at {MASTER_KEY_PATH}"))?,
    );
    let key = contents.trim();
    if key.is_empty() {
        bail!("master key file {MASTER_KEY_PATH} is empty");
    }

    let mut stdout = io::stdout().lock();
    stdout.write_all(key.as_bytes())?;
    stdout.flush()?;
    Ok(())
}
