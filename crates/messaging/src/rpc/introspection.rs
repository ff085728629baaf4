//! The built-in `IInterfaceQuery001` contract and the frozen descriptors
//! it serves.

use std::sync::Weak;

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::contract::{argument, InterfaceContract, OperationKind, ParameterSpec};
use super::request::Fault;
use super::BindingSet;

/// Interface name of the built-in introspection contract, auto-bound by
/// every behaviour.
pub const INTERFACE_QUERY: &str = "IInterfaceQuery001";

/// Frozen description of one bound interface.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceDescription {
    /// Interface name as declared.
    pub name: String,

    /// Introspectable methods.
    pub operations: Vec<OperationDescription>,

    /// Introspectable properties.
    pub properties: Vec<PropertyDescription>,
}

/// Description of one method.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationDescription {
    /// Operation name.
    pub name: String,

    /// Declared arguments in order.
    pub arguments: Vec<ArgumentDescription>,

    /// Declared return type; `None` for operations producing no value.
    pub return_type: Option<String>,

    /// Whether the server withholds the result.
    pub no_reply: bool,
}

/// Description of one method argument.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgumentDescription {
    /// Argument name.
    pub name: String,

    /// Declared type name.
    #[serde(rename = "type")]
    pub type_name: String,

    /// Whether the caller may omit it.
    pub optional: bool,
}

/// Description of one property.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDescription {
    /// Property name.
    pub name: String,

    /// Declared type name.
    #[serde(rename = "type")]
    pub type_name: String,

    /// Whether the property can be read.
    pub readable: bool,

    /// Whether the property can be written.
    pub writeable: bool,
}

impl InterfaceDescription {
    /// Builds the frozen descriptor for a contract, listing only members
    /// marked introspectable.
    pub(crate) fn from_contract(contract: &InterfaceContract) -> Self {
        let mut operations = Vec::new();
        let mut properties = Vec::new();
        for operation in contract.operations() {
            if !operation.allow_introspection {
                continue;
            }
            match operation.kind {
                OperationKind::Method => operations.push(OperationDescription {
                    name: operation.name.clone(),
                    arguments: operation
                        .parameters
                        .iter()
                        .map(|parameter| ArgumentDescription {
                            name: parameter.name.clone(),
                            type_name: parameter.type_name.clone(),
                            optional: parameter.optional,
                        })
                        .collect(),
                    return_type: operation.return_type.clone(),
                    no_reply: operation.no_reply,
                }),
                OperationKind::Property => properties.push(PropertyDescription {
                    name: operation.name.clone(),
                    type_name: operation
                        .return_type
                        .clone()
                        .unwrap_or_else(|| "object".to_string()),
                    readable: true,
                    writeable: false,
                }),
            }
        }
        Self {
            name: contract.name().to_string(),
            operations,
            properties,
        }
    }
}

fn behaviour_gone() -> Fault {
    Fault::exception("the rpc behaviour is no longer available")
}

/// Builds the query contract over a behaviour's binding set. The weak
/// reference keeps the auto-binding from owning its own registry.
pub(crate) fn contract(bindings: Weak<BindingSet>) -> InterfaceContract {
    let for_list = bindings.clone();
    let for_has = bindings.clone();
    let for_info = bindings;

    InterfaceContract::builder(INTERFACE_QUERY)
        .allow_introspection(false)
        .method("GetInterfaces", vec![], "string[]", move |_| {
            let bindings = for_list.clone();
            async move {
                let bindings = bindings.upgrade().ok_or_else(behaviour_gone)?;
                Ok(json!(bindings.introspectable_names()))
            }
        })
        .method(
            "HasInterface",
            vec![ParameterSpec::required("name", "string")],
            "bool",
            move |values| {
                let bindings = for_has.clone();
                async move {
                    let name: String = argument(&values, 0, "name")?;
                    let bindings = bindings.upgrade().ok_or_else(behaviour_gone)?;
                    Ok(json!(bindings.describe(&name).is_some()))
                }
            },
        )
        .method(
            "GetInterfaceInfo",
            vec![ParameterSpec::required("name", "string")],
            "InterfaceDescription",
            move |values| {
                let bindings = for_info.clone();
                async move {
                    let name: String = argument(&values, 0, "name")?;
                    let bindings = bindings.upgrade().ok_or_else(behaviour_gone)?;
                    let description = bindings
                        .describe(&name)
                        .ok_or_else(|| Fault::not_found("The interface could not be found"))?;
                    serde_json::to_value(description.as_ref()).map_err(Fault::exception)
                }
            },
        )
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::contract::OperationContract;
    use serde_json::Value;

    fn sample_contract() -> InterfaceContract {
        InterfaceContract::builder("IThermostat")
            .method(
                "SetTarget",
                vec![
                    ParameterSpec::required("celsius", "float64"),
                    ParameterSpec::optional("hold", "bool", json!(false)),
                ],
                "bool",
                |_| async { Ok(Value::Null) },
            )
            .operation(
                OperationContract::void_method("Recalibrate", vec![], |_| async {
                    Ok(Value::Null)
                })
                .no_reply(),
            )
            .operation(
                OperationContract::method("Diagnose", vec![], "string", |_| async {
                    Ok(Value::Null)
                })
                .hidden(),
            )
            .property("Current", "float64", || async { Ok(json!(21.5)) })
            .build()
    }

    #[test]
    fn descriptor_lists_introspectable_members_only() {
        let description = InterfaceDescription::from_contract(&sample_contract());
        assert_eq!(description.name, "IThermostat");
        let names: Vec<_> = description
            .operations
            .iter()
            .map(|op| op.name.as_str())
            .collect();
        assert_eq!(names, vec!["SetTarget", "Recalibrate"]);
    }

    #[test]
    fn descriptor_carries_signature_details() {
        let description = InterfaceDescription::from_contract(&sample_contract());
        let set_target = &description.operations[0];
        assert_eq!(set_target.arguments[0].type_name, "float64");
        assert!(!set_target.arguments[0].optional);
        assert!(set_target.arguments[1].optional);
        assert_eq!(set_target.return_type.as_deref(), Some("bool"));

        let recalibrate = &description.operations[1];
        assert!(recalibrate.no_reply);
        assert_eq!(recalibrate.return_type, None);
    }

    #[test]
    fn properties_are_readable_not_writeable() {
        let description = InterfaceDescription::from_contract(&sample_contract());
        assert_eq!(
            description.properties,
            vec![PropertyDescription {
                name: "Current".to_string(),
                type_name: "float64".to_string(),
                readable: true,
                writeable: false,
            }]
        );
    }
}
