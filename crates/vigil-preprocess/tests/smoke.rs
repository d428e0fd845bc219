use vigil_camera::Frame;
use vigil_preprocess::Preprocessor;

#[test]
fn cpu_smoke() {
    // flat grey 640×480
    let w = 640;
    let h = 480;
    let frame = Frame::from_rgb(w, h, vec![128u8; (w * h * 3) as usize]).unwrap();

    let pp = Preprocessor::yolo(416);
    let out = pp.run(&frame).unwrap();
    assert_eq!(out.shape(), &[1, 3, 416, 416]);

    // a flat image stays flat through the triangle filter
    let expected = 128.0 / 255.0;
    assert!(out.iter().all(|v| (v - expected).abs() < 1e-3));
}
