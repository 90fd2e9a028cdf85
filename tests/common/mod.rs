#![allow(dead_code)]

use bytes::Bytes;
use easyeda_convertlib::api::ComponentSource;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const SVG_NODE: &str = r#"SVGNODE~{"gId":"g1_outline","nodeName":"g","nodeType":1,"layerid":"19","attrs":{"c_width":"12","c_height":"8","c_origin":"4010,3020","z":"0","c_etype":"outline3D","id":"g1_outline","uuid":"0a1b2c3d","title":"SOT-23-5_L3.0-W1.7-H1.1","c_rotation":"0,0,90","transform":"scale(1) translate(0, 0)"},"childNodes":[]}"#;

/// A small two-pin SOT-23-5 style component, enough to exercise every encoder.
pub fn component_payload(lcsc_id: &str, name: &str) -> Value {
    json!({
        "lcsc": {
            "number": lcsc_id,
            "url": format!("https://lcsc.com/product-detail/{lcsc_id}.html")
        },
        "SMT": true,
        "dataStr": {
            "head": {
                "x": 400,
                "y": 300,
                "c_para": {
                    "name": name,
                    "pre": "U?",
                    "package": "SOT-23-5",
                    "BOM_Manufacturer": "TI"
                }
            },
            "shape": [
                "R~390~290~2~2~20~20~#880000~1~0~none~gge1~0~",
                "P~show~1~1~380~300~180~gge2~0^^380~300^^M 380 300 h 10~#880000^^1~393~304~0~IN~start~~~#0000FF^^1~386~299~0~1~end~~~#0000FF^^0~383~300^^0~M 380 297 L 377 300 L 380 303",
                "P~show~2~2~420~300~0~gge3~0^^420~300^^M 420 300 h -10~#880000^^1~407~304~0~OUT~end~~~#0000FF^^1~414~299~0~2~start~~~#0000FF^^0~417~300^^0~M 420 297 L 423 300 L 420 303",
                "A~M 390 290 A 10 10 0 0 1 410 290~~#880000~1~0~none~gge4~0",
                "T~L~400~280~0~#000000~~8pt~~~~comment~NE~1~start~gge5~0~pinpart"
            ]
        },
        "packageDetail": {
            "title": "SOT-23-5_L3.0-W1.7-P0.95-LS2.8-BR",
            "dataStr": {
                "head": {
                    "x": 4000,
                    "y": 3000,
                    "c_para": { "package": "SOT-23-5" }
                },
                "shape": [
                    "PAD~RECT~3990~3010~2.36~4.33~1~GND~1~0~3988.82 3007.83 3991.18 3007.83 3991.18 3012.17 3988.82 3012.17~0~gge6~0~~Y~0~0~0.4~3990,3010",
                    "PAD~RECT~4010~3010~2.36~4.33~1~VCC~2~0~4008.82 3007.83 4011.18 3007.83 4011.18 3012.17 4008.82 3012.17~0~gge7~0~~Y~0~0~0.4~4010,3010",
                    "TRACK~1~3~S$1~3985 2995 4015 2995~gge8~0",
                    SVG_NODE
                ]
            }
        }
    })
}

/// In-memory [`ComponentSource`] that records how many CAD fetches overlap.
#[derive(Default)]
pub struct FakeSource {
    pub payloads: HashMap<String, Value>,
    pub obj: Option<String>,
    pub step: Option<Bytes>,
    pub datasheet: Option<Bytes>,
    pub delay: Duration,
    pub calls: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl FakeSource {
    pub fn with_component(mut self, lcsc_id: &str, name: &str) -> Self {
        self.payloads
            .insert(lcsc_id.to_string(), component_payload(lcsc_id, name));
        self
    }
}

impl ComponentSource for FakeSource {
    async fn cad_data(&self, lcsc_id: &str) -> Option<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.payloads.get(lcsc_id).cloned()
    }

    async fn raw_3d_obj(&self, _uuid: &str) -> Option<String> {
        self.obj.clone()
    }

    async fn step_3d(&self, _uuid: &str) -> Option<Bytes> {
        self.step.clone()
    }

    async fn datasheet(&self, _url: &str) -> Option<Bytes> {
        self.datasheet.clone()
    }
}
