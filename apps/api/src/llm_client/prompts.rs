//! Prompts for announcement parsing.

/// System prompt enforcing JSON-only output for the announcement parser.
pub const ANNOUNCEMENT_SYSTEM: &str = "You are a precise, structured assistant \
    extracting civil-service recruitment data from Chinese announcement pages. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Builds the user prompt for parsing one announcement document.
pub fn announcement_prompt(content: &str) -> String {
    format!(
        r#"从下面的招考公告正文中提取结构化信息，输出如下 JSON：

{{
  "title": "公告标题",
  "department": "发布单位（可为 null）",
  "exam_type": "考试类型，如 国考/省考/事业单位/选调生（可为 null）",
  "year": 2025,
  "positions": [
    {{
      "position_id": "职位代码或编号",
      "position_name": "职位名称",
      "department_name": "招录单位",
      "department_level": "单位层级，如 中央/省级/市级/县级",
      "recruit_count": 1,
      "education": "学历要求，如 本科；无要求填 不限",
      "degree": "学位要求，如 学士；无要求填 不限",
      "major_list": ["专业代码列表"],
      "major_categories": ["专业大类列表"],
      "is_unlimited_major": false,
      "political_status": "政治面貌要求，如 中共党员；无要求填 不限",
      "age_min": 18,
      "age_max": 35,
      "work_experience_years": 0,
      "is_for_fresh_graduate": null,
      "gender": "不限",
      "hukou_provinces": [],
      "province": "省份行政区划代码",
      "city": "城市行政区划代码",
      "exam_type": "考试类型",
      "registration_start": "YYYY-MM-DD 或 null",
      "registration_end": "YYYY-MM-DD 或 null",
      "exam_date": "YYYY-MM-DD 或 null",
      "interview_date": "YYYY-MM-DD 或 null"
    }}
  ]
}}

规则：
- 日期一律用 YYYY-MM-DD；正文未提及的日期填 null，不要编造。
- is_for_fresh_graduate：仅限应届填 true，明确面向社会人员填 false，未提及填 null。
- 年龄未提及时 age_min/age_max 填 null。
- 正文没有职位明细表时 positions 为空数组。
- 数值字段不要输出为字符串。

公告正文：
{content}"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_embeds_content() {
        let prompt = announcement_prompt("2025年广东省考试录用公务员公告");
        assert!(prompt.contains("2025年广东省考试录用公务员公告"));
        assert!(prompt.contains("positions"));
    }
}
