//! UI rendering for the debugger.

use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Paragraph, List, ListItem},
    style::{Color, Style, Modifier},
};
use crate::Register;
use super::app::{DebuggerApp, MEM_ROW_WORDS};

/// Main draw function.
pub fn draw(frame: &mut Frame, app: &DebuggerApp) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(50),
            Constraint::Percentage(50),
        ])
        .split(frame.area());

    // Left side: code, registers and status
    let left_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(10),
            Constraint::Length(8),
            Constraint::Length(3),
        ])
        .split(chunks[0]);

    draw_disassembly(frame, left_chunks[0], app);
    draw_registers(frame, left_chunks[1], app);
    draw_status(frame, left_chunks[2], app);

    // Right side: memory, interrupts and help
    let right_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(10),
            Constraint::Length(5),
            Constraint::Length(4),
        ])
        .split(chunks[1]);

    draw_memory(frame, right_chunks[0], app);
    draw_interrupts(frame, right_chunks[1], app);
    draw_help(frame, right_chunks[2]);
}

/// Draw disassembly from PC onwards.
fn draw_disassembly(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let disasm = app.get_disassembly((area.height as usize).saturating_sub(2));

    let items: Vec<ListItem> = disasm
        .iter()
        .map(|(addr, instr, is_current)| {
            let prefix = if *is_current { "▶ " } else { "  " };
            let bp = if app.breakpoints.contains(addr) { "●" } else { " " };
            let text = format!("{}{:04x}: {}", prefix, addr, instr);

            let style = if *is_current {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else if app.breakpoints.contains(addr) {
                Style::default().fg(Color::Red)
            } else {
                Style::default()
            };

            ListItem::new(format!("{} {}", bp, text)).style(style)
        })
        .collect();

    let list = List::new(items)
        .block(Block::default()
            .title(" Disassembly ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan)));

    frame.render_widget(list, area);
}

fn reg_span(name: &str, value: u16, color: Color) -> Vec<Span<'static>> {
    vec![
        Span::raw(format!("{:>2}: ", name)),
        Span::styled(format!("{:04x}  ", value), Style::default().fg(color)),
    ]
}

/// Draw the register file.
fn draw_registers(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let regs = &app.cpu.regs;
    let general = |chunk: &[Register]| -> Line<'static> {
        Line::from(
            chunk
                .iter()
                .flat_map(|&r| reg_span(r.name(), regs.get(r), Color::White))
                .collect::<Vec<_>>(),
        )
    };

    let mut special = reg_span("PC", regs.pc, Color::Yellow);
    special.extend(reg_span("SP", regs.sp, Color::White));
    special.extend(reg_span("EX", regs.ex, Color::White));
    special.extend(reg_span("IA", regs.ia, Color::White));

    let content = vec![
        general(&Register::ALL[..4]),
        general(&Register::ALL[4..]),
        Line::from(special),
        Line::from(vec![
            Span::raw("Cycles: "),
            Span::styled(format!("{}", app.cpu.cycles), Style::default().fg(Color::Cyan)),
            Span::raw("   State: "),
            Span::styled(format!("{:?}", app.cpu.state),
                if app.cpu.is_running() {
                    Style::default().fg(Color::Green)
                } else {
                    Style::default().fg(Color::Red)
                }),
        ]),
    ];

    let paragraph = Paragraph::new(content)
        .block(Block::default()
            .title(" Registers ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Green)));

    frame.render_widget(paragraph, area);
}

/// Draw memory view, one row of words per line.
fn draw_memory(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let visible_rows = (area.height as usize).saturating_sub(2);
    let pc = app.cpu.regs.pc as usize;

    let items: Vec<ListItem> = (app.mem_scroll..)
        .take(visible_rows)
        .take_while(|row| row * MEM_ROW_WORDS < crate::cpu::MEMORY_SIZE)
        .map(|row| {
            let start = (row * MEM_ROW_WORDS) as u16;
            let words = app.cpu.mem.window(start, MEM_ROW_WORDS).unwrap_or_default();
            let hex: Vec<String> = words.iter().map(|w| format!("{:04x}", w)).collect();
            let text = format!("{:04x}: {}", start, hex.join(" "));

            let has_pc = (start as usize..start as usize + MEM_ROW_WORDS).contains(&pc);
            let style = if has_pc {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else if words.iter().any(|&w| w != 0) {
                Style::default().fg(Color::White)
            } else {
                Style::default().fg(Color::DarkGray)
            };

            ListItem::new(text).style(style)
        })
        .collect();

    let list = List::new(items)
        .block(Block::default()
            .title(" Memory ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Magenta)));

    frame.render_widget(list, area);
}

/// Draw the interrupt queue.
fn draw_interrupts(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let pending: Vec<String> = app.cpu.pending_interrupts().take(12).map(|m| format!("{:04x}", m)).collect();
    let count = app.cpu.pending_interrupts().count();

    let content = vec![
        Line::from(vec![
            Span::raw("Queueing: "),
            Span::styled(
                if app.cpu.is_queueing() { "on" } else { "off" },
                Style::default().fg(if app.cpu.is_queueing() { Color::Yellow } else { Color::Gray }),
            ),
            Span::raw(format!("   Pending: {}   Devices: {}", count, app.cpu.device_count())),
        ]),
        Line::from(pending.join(" ")),
    ];

    let paragraph = Paragraph::new(content)
        .block(Block::default()
            .title(" Interrupts ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Blue)));

    frame.render_widget(paragraph, area);
}

/// Draw status bar.
fn draw_status(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let status = Paragraph::new(app.status.clone())
        .style(Style::default().fg(Color::White))
        .block(Block::default()
            .title(" Status ")
            .borders(Borders::ALL));

    frame.render_widget(status, area);
}

/// Draw help panel.
fn draw_help(frame: &mut Frame, area: Rect) {
    let help = Paragraph::new(vec![
        Line::from("s: Step  r: Run  p: Pause  b: Breakpoint"),
        Line::from("x: Reset  ↑↓/PgUp/PgDn: Scroll memory  q: Quit"),
    ])
    .style(Style::default().fg(Color::DarkGray))
    .block(Block::default()
        .title(" Help ")
        .borders(Borders::ALL));

    frame.render_widget(help, area);
}
