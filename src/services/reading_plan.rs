//! 阅读计划生成
//!
//! 把剩余页数均匀分配到“今天 ~ 目标日期”的每一天；
//! 无法整除时前面的日子多读一页，页数少于天数时只生成有页数的日子。

use chrono::{Duration, NaiveDate};

use crate::models::{PlanItem, ReadingEntry, TextbookRecord};

/// 生成阅读计划；总页数或目标日期缺失时返回错误说明
pub fn build_study_plan(record: &TextbookRecord, today: NaiveDate) -> Result<Vec<PlanItem>, String> {
    if record.total_pages == 0 {
        return Err("缺少总页数，无法生成阅读计划".into());
    }
    let target = record
        .target_date
        .ok_or_else(|| "缺少目标完成日期，无法生成阅读计划".to_string())?;

    let current = record.current_page.min(record.total_pages);
    let remaining = record.total_pages - current;
    if remaining == 0 {
        return Ok(Vec::new());
    }

    // 目标日期已过时全部排在今天
    let days = ((target - today).num_days() + 1).max(1) as u32;
    let base = remaining / days;
    let extra = remaining % days;

    let mut items = Vec::new();
    let mut next_page = current + 1;
    for day in 0..days {
        let pages = base + u32::from(day < extra);
        if pages == 0 {
            continue;
        }
        let end_page = next_page + pages - 1;
        items.push(PlanItem {
            date: today + Duration::days(i64::from(day)),
            start_page: next_page,
            end_page,
            done: false,
        });
        next_page = end_page + 1;
    }
    Ok(items)
}

/// 读到 `to_page` 后把已覆盖的计划项标记为完成
pub fn mark_plan_progress(plan: &mut [PlanItem], to_page: u32) {
    for item in plan.iter_mut() {
        if item.end_page <= to_page {
            item.done = true;
        }
    }
}

/// 阅读历史中的总时长（分钟）
pub fn total_reading_minutes(history: &[ReadingEntry]) -> u64 {
    history.iter().map(|e| u64::from(e.minutes)).sum()
}
