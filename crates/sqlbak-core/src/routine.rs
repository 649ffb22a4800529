//! 视图、存储过程与函数定义的导出

use std::io::Write;

use crate::driver::{DumpSession, quote_ident};
use crate::introspect::{list_routines, list_views};
use crate::script::ScriptWriter;
use crate::table::DumpError;
use crate::{RoutineDescriptor, ViewDescriptor};

/// 例程体内的分号不能结束外层脚本，临时切换语句分隔符
const ROUTINE_DELIMITER: &str = "$$";

/// 导出全部视图，返回写出的视图数；没有视图时不写任何内容
pub fn dump_views<W: Write>(
    session: &mut dyn DumpSession,
    writer: &mut ScriptWriter<W>,
    skipped: &mut Vec<String>,
) -> Result<usize, DumpError> {
    let views = list_views(session, skipped)?;
    if views.is_empty() {
        tracing::info!("没有需要导出的视图");
        return Ok(0);
    }

    let section: String = views.iter().map(view_section).collect();
    writer.write_section(&section)?;
    tracing::info!("视图导出完成，共 {} 个", views.len());
    Ok(views.len())
}

/// 导出存储过程与函数（先过程后函数），返回写出的数量
pub fn dump_routines<W: Write>(
    session: &mut dyn DumpSession,
    writer: &mut ScriptWriter<W>,
    skipped: &mut Vec<String>,
) -> Result<usize, DumpError> {
    let routines = list_routines(session, skipped)?;
    if routines.is_empty() {
        tracing::info!("没有需要导出的存储过程或函数");
        return Ok(0);
    }

    for routine in &routines {
        writer.write_section(&routine_section(routine))?;
    }
    tracing::info!("存储过程与函数导出完成，共 {} 个", routines.len());
    Ok(routines.len())
}

fn view_section(view: &ViewDescriptor) -> String {
    format!(
        "\n\n-- Definition for view {}\n{};\n",
        quote_ident(&view.name),
        view.definition.trim_end().trim_end_matches(';')
    )
}

fn routine_section(routine: &RoutineDescriptor) -> String {
    format!(
        "\n\n-- {}: {}\nDELIMITER {d}\n{} {d}\nDELIMITER ;\n",
        routine.kind.heading(),
        routine.name,
        routine.definition.trim_end(),
        d = ROUTINE_DELIMITER
    )
}
