use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// 几何类型名称
const GEOMETRY_TYPES: [&str; 8] = [
    "geometry",
    "point",
    "lineString",
    "polygon",
    "multiPoint",
    "multiLineString",
    "multiPolygon",
    "geometryCollection",
];

/// 判断数据类型是否为几何类型
pub fn is_geometry_type(data_type: &str) -> bool {
    GEOMETRY_TYPES
        .iter()
        .any(|geometry_type| geometry_type.eq_ignore_ascii_case(data_type))
}

/// 几何属性的坐标系配置
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeometryConfig {
    #[serde(default)]
    pub srid: Option<u32>,
    #[serde(default)]
    pub num_axis: Option<u8>,
    #[serde(default)]
    pub valid_srids: Vec<u32>,
}

/// 业务应用参数定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterDefinition {
    pub name: String,
    pub data_type: String,
    /// 排序索引：作业参数使用声明索引，其余为 100000 + 声明索引
    pub index: u32,
    pub description: Option<String>,
    pub required: bool,
    pub job_parameter: bool,
    pub request_parameter: bool,
    pub geometry: Option<GeometryConfig>,
}

/// 结果属性定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeDefinition {
    pub name: String,
    pub data_type: String,
    pub index: u32,
    pub description: Option<String>,
    pub geometry: Option<GeometryConfig>,
}

/// 模块中发现的业务应用
///
/// 每次模块启动时构建一次，直到下次重启前保持不变。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessApplication {
    pub name: String,
    pub version: String,
    pub title: String,
    pub description: Option<String>,
    pub module_name: String,
    /// 按排序索引升序排列
    pub parameters: Vec<ParameterDefinition>,
    /// 按索引升序排列；存在结果列表时为列表元素的属性
    pub result_attributes: Vec<AttributeDefinition>,
    pub result_list_name: Option<String>,
    pub batch_mode_permission: String,
    pub instant_mode_permission: String,
    pub input_data_content_types: Vec<String>,
    pub result_data_content_types: Vec<String>,
    pub per_request_input_data: bool,
    pub per_request_result_data: bool,
    pub max_requests_per_job: u32,
    pub num_requests_per_worker: u32,
    pub max_concurrent_requests: u32,
    pub log_level: String,
    pub security_service_required: bool,
    /// 启动时从配置属性（`APP_<NAME>`组件）应用的属性
    pub properties: BTreeMap<String, Value>,
}

impl BusinessApplication {
    pub fn parameter(&self, name: &str) -> Option<&ParameterDefinition> {
        self.parameters.iter().find(|parameter| parameter.name == name)
    }

    pub fn job_parameters(&self) -> impl Iterator<Item = &ParameterDefinition> {
        self.parameters.iter().filter(|parameter| parameter.job_parameter)
    }

    pub fn request_parameters(&self) -> impl Iterator<Item = &ParameterDefinition> {
        self.parameters
            .iter()
            .filter(|parameter| parameter.request_parameter)
    }

    pub fn has_result_list(&self) -> bool {
        self.result_list_name.is_some()
    }

    /// 配置属性组件名
    pub fn component_name(&self) -> String {
        format!("APP_{}", self.name.to_uppercase())
    }
}
