//! 插件清单校验
//!
//! 所有违规都会被收集而不是在第一个错误处停止，调用方把它们追加到模块错误中。

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use batchhost_core::models::{
    is_geometry_type, AttributeDefinition, BusinessApplication, GeometryConfig,
    ParameterDefinition,
};

use crate::manifest::{AttributeSpec, PluginDescriptor, PluginManifest};

/// 非作业参数的排序索引偏移
pub const REQUEST_PARAMETER_INDEX_OFFSET: u32 = 100_000;

const JSON_CONTENT_TYPE: &str = "application/json";
const ANY_CONTENT_TYPE: &str = "*/*";

/// 校验结果
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<ValidationError>,
}

/// 校验错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field_path: String,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field_path, self.message)
    }
}

/// 校验通过的业务应用及其插件类
#[derive(Debug, Clone)]
pub struct ValidatedPlugin {
    pub plugin_class: String,
    pub application: BusinessApplication,
}

/// 插件清单校验器
pub struct ManifestValidator {
    module_name: String,
}

impl ManifestValidator {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
        }
    }

    /// 校验清单并构建业务应用，返回的应用按清单顺序排列
    pub fn validate(&self, manifest: &PluginManifest) -> (Vec<ValidatedPlugin>, ValidationResult) {
        let mut errors = Vec::new();
        let mut plugins = Vec::new();
        let mut names = BTreeSet::new();

        for descriptor in &manifest.plugins {
            let name = descriptor.application_name();
            if name.is_empty() {
                push(&mut errors, &descriptor.class, "业务应用名称不能为空");
                continue;
            }
            if !names.insert(name.clone()) {
                push(&mut errors, &name, "业务应用名称在模块中重复");
                continue;
            }

            let before = errors.len();
            let application = self.build_application(&name, descriptor, &mut errors);
            if errors.len() == before {
                plugins.push(ValidatedPlugin {
                    plugin_class: descriptor.class.clone(),
                    application,
                });
            }
        }

        let result = ValidationResult {
            is_valid: errors.is_empty(),
            errors,
        };
        (plugins, result)
    }

    fn build_application(
        &self,
        name: &str,
        descriptor: &PluginDescriptor,
        errors: &mut Vec<ValidationError>,
    ) -> BusinessApplication {
        if descriptor.scope != "prototype" {
            push(
                errors,
                name,
                format!("插件 {} 的作用域必须为 prototype", descriptor.class),
            );
        }

        let parameters = self.build_parameters(name, descriptor, errors);
        let result_attributes = self.build_results(name, descriptor, errors);
        let result_list_name = descriptor.result_lists.first().map(|list| list.name.clone());

        let hooks = descriptor.hooks;
        if descriptor.per_request_input_data {
            if parameters.iter().any(|parameter| parameter.request_parameter) {
                push(errors, name, "使用请求级不透明输入数据时不能声明请求参数");
            }
            if !hooks.set_input_data || !hooks.set_input_data_content_type {
                push(
                    errors,
                    name,
                    "使用请求级不透明输入数据时必须实现 set_input_data 和 set_input_data_content_type",
                );
            }
        }

        if descriptor.per_request_result_data {
            if !hooks.set_result_data || !hooks.set_result_data_content_type {
                push(
                    errors,
                    name,
                    "使用请求级不透明结果数据时必须实现 set_result_data 和 set_result_data_content_type",
                );
            }
            if !descriptor.results.is_empty() {
                push(errors, name, "使用请求级不透明结果数据时不能声明结果属性");
            }
            if !descriptor.result_lists.is_empty() {
                push(errors, name, "使用请求级不透明结果数据时不能声明结果列表");
            }
        } else if descriptor.result_lists.is_empty() && descriptor.results.is_empty() {
            push(errors, name, "必须声明结果属性或结果列表");
        }

        if descriptor.result_lists.len() > 1 {
            push(errors, name, "最多只能声明一个结果列表");
        }
        if !descriptor.result_lists.is_empty() && !descriptor.results.is_empty() {
            push(errors, name, "结果列表不能与顶层结果属性同时声明");
        }

        BusinessApplication {
            name: name.to_string(),
            version: descriptor.version.clone(),
            title: descriptor.title.clone().unwrap_or_else(|| name.to_string()),
            description: descriptor.description.clone(),
            module_name: self.module_name.clone(),
            parameters,
            result_attributes,
            result_list_name,
            batch_mode_permission: descriptor.batch_mode_permission.clone(),
            instant_mode_permission: descriptor.instant_mode_permission.clone(),
            input_data_content_types: content_types(
                &descriptor.input_data_content_types,
                descriptor.per_request_input_data,
            ),
            result_data_content_types: content_types(
                &descriptor.result_data_content_types,
                descriptor.per_request_result_data,
            ),
            per_request_input_data: descriptor.per_request_input_data,
            per_request_result_data: descriptor.per_request_result_data,
            max_requests_per_job: descriptor.max_requests_per_job,
            num_requests_per_worker: descriptor.num_requests_per_worker,
            max_concurrent_requests: descriptor.max_concurrent_requests,
            log_level: descriptor.log_level.to_uppercase(),
            security_service_required: descriptor.security_service_required,
            properties: BTreeMap::new(),
        }
    }

    fn build_parameters(
        &self,
        name: &str,
        descriptor: &PluginDescriptor,
        errors: &mut Vec<ValidationError>,
    ) -> Vec<ParameterDefinition> {
        let mut indices = BTreeMap::new();
        let mut names = BTreeSet::new();
        let mut parameters = Vec::with_capacity(descriptor.parameters.len());

        for spec in &descriptor.parameters {
            let path = format!("{name}.{}", spec.name);
            if !names.insert(spec.name.as_str()) {
                push(errors, &path, "参数名称重复");
            }
            if !spec.job_parameter && !spec.request_parameter {
                push(errors, &path, "参数必须是作业参数或请求参数");
            }
            let index = if spec.job_parameter {
                Some(spec.index)
            } else {
                REQUEST_PARAMETER_INDEX_OFFSET.checked_add(spec.index)
            };
            let Some(index) = index else {
                push(errors, &path, format!("参数索引 {} 超出范围", spec.index));
                continue;
            };
            if let Some(other) = indices.insert(index, spec.name.as_str()) {
                push(errors, &path, format!("参数索引 {index} 与参数 {other} 重复"));
            }
            check_geometry(&path, &spec.data_type, spec.geometry.as_ref(), errors);

            parameters.push(ParameterDefinition {
                name: spec.name.clone(),
                data_type: spec.data_type.clone(),
                index,
                description: spec.description.clone(),
                required: spec.required,
                job_parameter: spec.job_parameter,
                request_parameter: spec.request_parameter,
                geometry: spec.geometry.clone(),
            });
        }

        parameters.sort_by_key(|parameter| parameter.index);
        parameters
    }

    fn build_results(
        &self,
        name: &str,
        descriptor: &PluginDescriptor,
        errors: &mut Vec<ValidationError>,
    ) -> Vec<AttributeDefinition> {
        let (path, specs) = match descriptor.result_lists.first() {
            Some(list) => (format!("{name}.{}", list.name), &list.attributes),
            None => (name.to_string(), &descriptor.results),
        };
        build_attributes(&path, specs, errors)
    }
}

fn build_attributes(
    path: &str,
    specs: &[AttributeSpec],
    errors: &mut Vec<ValidationError>,
) -> Vec<AttributeDefinition> {
    let mut indices = BTreeMap::new();
    let mut attributes = Vec::with_capacity(specs.len());

    for spec in specs {
        let attribute_path = format!("{path}.{}", spec.name);
        if let Some(other) = indices.insert(spec.index, spec.name.as_str()) {
            push(
                errors,
                &attribute_path,
                format!("结果属性索引 {} 与属性 {other} 重复", spec.index),
            );
        }
        check_geometry(
            &attribute_path,
            &spec.data_type,
            spec.geometry.as_ref(),
            errors,
        );
        attributes.push(AttributeDefinition {
            name: spec.name.clone(),
            data_type: spec.data_type.clone(),
            index: spec.index,
            description: spec.description.clone(),
            geometry: spec.geometry.clone(),
        });
    }

    attributes.sort_by_key(|attribute| attribute.index);
    attributes
}

fn check_geometry(
    path: &str,
    data_type: &str,
    geometry: Option<&GeometryConfig>,
    errors: &mut Vec<ValidationError>,
) {
    if geometry.is_some() && !is_geometry_type(data_type) {
        push(
            errors,
            path,
            format!("几何配置只能用于几何类型属性，实际类型为 {data_type}"),
        );
    }
}

fn content_types(declared: &[String], opaque: bool) -> Vec<String> {
    if !declared.is_empty() {
        declared.to_vec()
    } else if opaque {
        vec![ANY_CONTENT_TYPE.to_string()]
    } else {
        vec![JSON_CONTENT_TYPE.to_string()]
    }
}

fn push(errors: &mut Vec<ValidationError>, field_path: &str, message: impl Into<String>) {
    errors.push(ValidationError {
        field_path: field_path.to_string(),
        message: message.into(),
    });
}
