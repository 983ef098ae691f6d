//! Info.plist access and bundle identifier rewriting.

use crate::error::{Context, Error, Result};
use plist::{Dictionary, Value};
use std::path::Path;

pub const CF_BUNDLE_EXECUTABLE: &str = "CFBundleExecutable";
pub const CF_BUNDLE_IDENTIFIER: &str = "CFBundleIdentifier";
pub const UI_SUPPORTED_DEVICES: &str = "UISupportedDevices";
pub const UI_SUPPORTS_DOCUMENT_BROWSER: &str = "UISupportsDocumentBrowser";
pub const UI_FILE_SHARING_ENABLED: &str = "UIFileSharingEnabled";
pub const WK_COMPANION_APP_BUNDLE_IDENTIFIER: &str = "WKCompanionAppBundleIdentifier";
pub const WK_APP_BUNDLE_IDENTIFIER: &str = "WKAppBundleIdentifier";
pub const NS_EXTENSION: &str = "NSExtension";
pub const NS_EXTENSION_POINT_IDENTIFIER: &str = "NSExtensionPointIdentifier";
pub const NS_EXTENSION_ATTRIBUTES: &str = "NSExtensionAttributes";

const WATCHKIT_EXTENSION_POINT: &str = "com.apple.watchkit";

/// Read a property list whose root is a dictionary.
pub fn read_dictionary(path: &Path) -> Result<Dictionary> {
    Value::from_file(path)
        .map_err(Error::Plist)
        .with_context(|| format!("reading {}", path.display()))?
        .into_dictionary()
        .with_context(|| format!("{} is not a dictionary", path.display()))
}

/// Write `dictionary` as an XML property list.
pub fn write_dictionary(dictionary: &Dictionary, path: &Path) -> Result<()> {
    Value::Dictionary(dictionary.clone())
        .to_file_xml(path)
        .map_err(Error::Plist)
        .with_context(|| format!("writing {}", path.display()))
}

/// String value of `key`, if present and a string.
pub fn string_value<'a>(dictionary: &'a Dictionary, key: &str) -> Option<&'a str> {
    dictionary.get(key).and_then(Value::as_string)
}

/// `CFBundleExecutable` of an Info.plist dictionary.
pub fn bundle_executable(dictionary: &Dictionary) -> Result<&str> {
    string_value(dictionary, CF_BUNDLE_EXECUTABLE).context("Info.plist has no CFBundleExecutable")
}

/// `CFBundleIdentifier` of an Info.plist dictionary.
pub fn bundle_identifier(dictionary: &Dictionary) -> Result<&str> {
    string_value(dictionary, CF_BUNDLE_IDENTIFIER).context("Info.plist has no CFBundleIdentifier")
}

/// Executable name declared by the Info.plist of the bundle directory `bundle`.
pub fn executable_of(bundle: &Path) -> Result<String> {
    let dictionary = read_dictionary(&bundle.join("Info.plist"))?;
    Ok(bundle_executable(&dictionary)?.to_string())
}

/// Rewrite every occurrence of `package_id` in the bundle identifiers of `dictionary`.
///
/// Covers `CFBundleIdentifier`, the WatchKit companion identifier, and the WatchKit
/// extension's app identifier. Returns whether anything changed.
pub fn replace_bundle_identifiers(
    dictionary: &mut Dictionary,
    package_id: &str,
    custom_id: &str,
) -> bool {
    let mut changed = false;

    if string_value(dictionary, WK_COMPANION_APP_BUNDLE_IDENTIFIER).is_some() {
        dictionary.insert(
            WK_COMPANION_APP_BUNDLE_IDENTIFIER.to_string(),
            Value::String(custom_id.to_string()),
        );
        changed = true;
    }

    if let Some(extension) = dictionary
        .get_mut(NS_EXTENSION)
        .and_then(Value::as_dictionary_mut)
        && string_value(extension, NS_EXTENSION_POINT_IDENTIFIER) == Some(WATCHKIT_EXTENSION_POINT)
        && let Some(attributes) = extension
            .get_mut(NS_EXTENSION_ATTRIBUTES)
            .and_then(Value::as_dictionary_mut)
        && let Some(app_id) = string_value(attributes, WK_APP_BUNDLE_IDENTIFIER)
    {
        let replaced = app_id.replace(package_id, custom_id);
        attributes.insert(WK_APP_BUNDLE_IDENTIFIER.to_string(), Value::String(replaced));
        changed = true;
    }

    if let Some(bundle_id) = string_value(dictionary, CF_BUNDLE_IDENTIFIER)
        && bundle_id.contains(package_id)
    {
        let replaced = bundle_id.replace(package_id, custom_id);
        dictionary.insert(CF_BUNDLE_IDENTIFIER.to_string(), Value::String(replaced));
        changed = true;
    }

    changed
}
