// SPDX-License-Identifier: CEPL-1.0
//! Routes driver/validation messages into `tracing`.
use std::borrow::Cow;
use std::ffi::{c_void, CStr};

use anyhow::{Context, Result};
use ash::ext::debug_utils;
use ash::{vk, Entry, Instance};
use tracing::{debug, error, trace, warn};

type Severity = vk::DebugUtilsMessageSeverityFlagsEXT;
type Kind = vk::DebugUtilsMessageTypeFlagsEXT;

pub fn severity_label(severity: Severity) -> &'static str {
    if severity.contains(Severity::ERROR) {
        "error"
    } else if severity.contains(Severity::WARNING) {
        "warning"
    } else if severity.contains(Severity::INFO) {
        "info"
    } else {
        "verbose"
    }
}

/// "General | Validation" style label; "Unknown" when no known bit is set.
pub fn type_label(kinds: Kind) -> String {
    let names: Vec<&str> = [
        (Kind::GENERAL, "General"),
        (Kind::VALIDATION, "Validation"),
        (Kind::PERFORMANCE, "Performance"),
    ]
    .into_iter()
    .filter(|(bit, _)| kinds.contains(*bit))
    .map(|(_, name)| name)
    .collect();
    if names.is_empty() {
        "Unknown".to_owned()
    } else {
        names.join(" | ")
    }
}

unsafe extern "system" fn debug_callback(
    severity: Severity,
    kinds: Kind,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    let msg: Cow<'_, str> = if data.is_null() {
        Cow::Borrowed("<no message>")
    } else {
        let p = unsafe { (*data).p_message };
        if p.is_null() {
            Cow::Borrowed("<no message>")
        } else {
            unsafe { CStr::from_ptr(p) }.to_string_lossy()
        }
    };
    let kind = type_label(kinds);
    match severity_label(severity) {
        "error" => error!("[vk {kind}] {msg}"),
        "warning" => warn!("[vk {kind}] {msg}"),
        "info" => debug!("[vk {kind}] {msg}"),
        _ => trace!("[vk {kind}] {msg}"),
    }
    vk::FALSE
}

/// Also chained into instance creation so create/destroy of the instance is covered.
pub fn messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: Severity::VERBOSE | Severity::INFO | Severity::WARNING | Severity::ERROR,
        message_type: Kind::GENERAL | Kind::VALIDATION | Kind::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    }
}

pub struct DebugMessenger {
    loader: debug_utils::Instance,
    handle: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    pub unsafe fn new(entry: &Entry, instance: &Instance) -> Result<Self> {
        let loader = debug_utils::Instance::new(entry, instance);
        let ci = messenger_create_info();
        let handle = unsafe { loader.create_debug_utils_messenger(&ci, None) }
            .context("create_debug_utils_messenger")?;
        Ok(Self { loader, handle })
    }

    /// Must run before the instance is destroyed.
    pub unsafe fn destroy(self) {
        unsafe { self.loader.destroy_debug_utils_messenger(self.handle, None) };
    }
}
