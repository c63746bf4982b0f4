//! Composes `org.freedesktop.DBus.Introspectable.Introspect` XML from the
//! registered interface hierarchy (§4.G).
//!
//! Every path this builds for replies standard `Introspectable` and `Peer`
//! interfaces plus whatever interfaces/members are actually registered at
//! that object, and lists unregistered child object paths as bare
//! `<node name="…"/>` entries — exactly the two cases §4.G names.

use super::hierarchy::Hierarchy;

const STANDARD_INTERFACES: &str = r#"  <interface name="org.freedesktop.DBus.Introspectable">
    <method name="Introspect">
      <arg name="xml_data" type="s" direction="out"/>
    </method>
  </interface>
  <interface name="org.freedesktop.DBus.Peer">
    <method name="Ping"/>
    <method name="GetMachineId">
      <arg name="machine_uuid" type="s" direction="out"/>
    </method>
  </interface>
"#;

/// Builds the introspection document for `object`. Method arguments are
/// declared as a single opaque byte-array in and out (`ay`), matching the
/// byte-oriented calling convention every plugin-bound method actually
/// uses (§4.G's binding ABI carries raw bytes, not typed D-Bus signatures).
pub fn introspect_xml(hierarchy: &Hierarchy, object: &str) -> String {
    introspect_xml_with_extra(hierarchy, object, &[])
}

/// Same as [`introspect_xml`], plus a fixed list of `(interface, members)`
/// pairs to merge in verbatim — used for the daemon's own
/// `com.nokia.dsme.request`/`com.nokia.dsme.signal` interfaces, which are
/// core-owned and never go through the plugin binding tree.
pub fn introspect_xml_with_extra(hierarchy: &Hierarchy, object: &str, extra: &[(&str, &[&str])]) -> String {
    let mut xml = String::from("<!DOCTYPE node PUBLIC \"-//freedesktop//DTD D-BUS Object Introspection 1.0//EN\"\n\"http://www.freedesktop.org/standards/dbus/1.0/introspect.dtd\">\n<node>\n");
    xml.push_str(STANDARD_INTERFACES);

    for (interface, members) in &extra {
        xml.push_str(&format!("  <interface name=\"{interface}\">\n"));
        for member in *members {
            xml.push_str(&format!("    <method name=\"{member}\"/>\n"));
        }
        xml.push_str("  </interface>\n");
    }

    for (interface, members) in hierarchy.interfaces_at(object) {
        xml.push_str(&format!("  <interface name=\"{interface}\">\n"));
        for member in members {
            xml.push_str(&format!(
                "    <method name=\"{member}\">\n      <arg name=\"args\" type=\"ay\" direction=\"in\"/>\n      <arg name=\"reply\" type=\"ay\" direction=\"out\"/>\n    </method>\n"
            ));
        }
        xml.push_str("  </interface>\n");
    }

    for child in hierarchy.child_nodes(object) {
        xml.push_str(&format!("  <node name=\"{child}\"/>\n"));
    }

    xml.push_str("</node>\n");
    xml
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsme_core::abi::CEndpoint;
    use dsme_core::PluginId;

    unsafe extern "C" fn noop(
        _sender: CEndpoint,
        _args_ptr: *const u8,
        _args_len: usize,
        _reply_buf: *mut u8,
        _reply_cap: usize,
        _reply_len: *mut usize,
        _user_data: *mut std::ffi::c_void,
    ) -> i32 {
        0
    }

    #[test]
    fn composes_registered_interface_and_child_nodes() {
        let mut h = Hierarchy::new();
        h.bind_method(
            "com.nokia.dsme",
            "/com/nokia/dsme/request",
            "com.nokia.dsme.request",
            "get_version",
            super::super::hierarchy::MethodBinding {
                owner: PluginId::from(0),
                privileged: false,
                callback: noop,
                user_data: 0,
            },
        );
        let xml = introspect_xml(&h, "/com/nokia/dsme/request");
        assert!(xml.contains("com.nokia.dsme.request"));
        assert!(xml.contains("get_version"));
        assert!(xml.contains("Introspectable"));

        let parent_xml = introspect_xml(&h, "/com/nokia/dsme");
        assert!(parent_xml.contains("<node name=\"request\"/>"));
    }
}
