use crate::domain::account::{ServerConfig, UserAccount};
use crate::error::Result;
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Reads a JSON array of user accounts with their payment methods.
pub fn read_accounts<R: Read>(source: R) -> Result<Vec<UserAccount>> {
    read_array(source)
}

pub fn read_server_configs<R: Read>(source: R) -> Result<Vec<ServerConfig>> {
    read_array(source)
}

pub fn load_accounts(path: &Path) -> Result<Vec<UserAccount>> {
    read_accounts(BufReader::new(File::open(path)?))
}

pub fn load_server_configs(path: &Path) -> Result<Vec<ServerConfig>> {
    read_server_configs(BufReader::new(File::open(path)?))
}

fn read_array<T: DeserializeOwned, R: Read>(source: R) -> Result<Vec<T>> {
    Ok(serde_json::from_reader(source)?)
}
