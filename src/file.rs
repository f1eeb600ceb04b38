//! File-backed assets
//!
//! A file asset reads its backing path at construction and again whenever
//! the watch/replay machinery sees the path change. Content is decoded to
//! text only when the mime type is textual; icons and other binaries stay
//! raw buffers and pass through the transform stages unchanged.

use std::path::Path;
use std::time::SystemTime;

use crate::asset::{Asset, AssetKind};
use crate::env::Environment;
use crate::error::HopperError;
use crate::filter;
use crate::load::Load;
use crate::mime;

impl Asset {
    /// Create a file-backed asset and read its content.
    pub(crate) fn new_file(
        env: &Environment,
        location: &str,
        modified: Option<SystemTime>,
        load: Option<&Load>,
    ) -> Asset {
        let asset = Asset::create(env, AssetKind::FileBacked, location, modified, load);
        asset.read_file();
        asset
    }

    /// Read from the file system and set content on this asset. Re-invoked
    /// by the watch system when the underlying path changes.
    pub fn read_file(&self) -> Asset {
        self.waiter().wait(1);
        match std::fs::read(self.location()) {
            Ok(bytes) => self.handle_content(bytes),
            Err(err) => self
                .env()
                .logger()
                .error(&format!("failed to load file {}: {err}", self.location())),
        }
        self.waiter().unwait(1);
        self.clone()
    }

    /// Decode bytes per the asset's mime type and store them.
    pub(crate) fn handle_content(&self, bytes: Vec<u8>) {
        if mime::is_textual(&self.file_type()) {
            self.set_content(String::from_utf8_lossy(&bytes).into_owned());
        } else {
            self.set_content(bytes);
        }
    }

    /// Create an asset produced by the named filter over the backing tree.
    pub(crate) fn new_filtered(
        env: &Environment,
        filter_name: &str,
        location: &str,
        modified: Option<SystemTime>,
        load: Option<&Load>,
    ) -> Asset {
        let asset = Asset::create(
            env,
            AssetKind::Filtered(filter_name.to_string()),
            location,
            modified,
            load,
        );
        asset.produce();
        asset
    }

    /// Run the filter tool and adopt its output. The output artifact's
    /// extension may retype the asset (a packed directory becomes a .js
    /// asset, say); the cache key stays the original location.
    pub(crate) fn produce(&self) {
        let AssetKind::Filtered(name) = self.kind() else {
            return;
        };
        let Some(producer) = self.env().filter(&name) else {
            self.env()
                .logger()
                .error(&HopperError::UnknownFilter { name }.to_string());
            return;
        };
        self.waiter().wait(1);
        let root = Path::new(self.location()).to_path_buf();
        let entries = filter::dive(&root);
        match producer.produce(&root, &entries) {
            Ok(output) => {
                if let Some(extension) = output.name.rsplit('.').next() {
                    let extension = extension.to_lowercase();
                    if extension != self.file_type() && extension != output.name {
                        self.set_path_and_type(
                            format!("{}.{extension}", self.path()),
                            extension,
                        );
                    }
                }
                self.handle_content(output.content);
            }
            Err(err) => self
                .env()
                .logger()
                .error(&format!("filter '{name}' failed for {}: {err}", self.location())),
        }
        self.waiter().unwait(1);
    }

    /// Re-produce this asset's content from its source.
    pub fn refresh(&self) {
        match self.kind() {
            AssetKind::FileBacked => {
                self.read_file();
            }
            AssetKind::Filtered(_) => self.produce(),
            AssetKind::Raw => {}
        }
    }
}
